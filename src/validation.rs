//! Frame validation utilities.
//!
//! These checks back the buffer-safety guarantees: generations observed by a
//! reader never go backwards, and a snapshot written with
//! [`TestPattern::Generation`](crate::mock::TestPattern::Generation) holds
//! bytes from exactly one generation.

use thiserror::Error;

use crate::buffer::FrameSnapshot;

/// A frame sequence or frame content check that failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing to validate.
    #[error("cannot validate an empty generation sequence")]
    Empty,

    /// A later observation reported an older generation.
    #[error("generation went backwards at index {index}: {previous} then {current}")]
    Regression {
        /// Position of the offending observation.
        index: usize,
        /// Generation observed before it.
        previous: u64,
        /// Generation observed at `index`.
        current: u64,
    },

    /// A snapshot contains a byte from a different generation.
    #[error("byte {offset} of generation {generation} holds {actual}, expected {expected}")]
    Torn {
        /// Generation of the snapshot.
        generation: u64,
        /// Offending byte offset.
        offset: usize,
        /// Byte implied by the generation.
        expected: u8,
        /// Byte found.
        actual: u8,
    },
}

/// Validates that observed generations never decrease.
///
/// Repeats are allowed; a reader may poll faster than the driver writes.
pub fn validate_generations(generations: &[u64]) -> Result<(), ValidationError> {
    if generations.is_empty() {
        return Err(ValidationError::Empty);
    }

    for (index, pair) in generations.windows(2).enumerate() {
        if let [previous, current] = *pair {
            if current < previous {
                return Err(ValidationError::Regression {
                    index: index + 1,
                    previous,
                    current,
                });
            }
        }
    }

    Ok(())
}

/// Validates that every byte of `snapshot` is the low byte of its generation.
pub fn validate_generation_fill(snapshot: &FrameSnapshot) -> Result<(), ValidationError> {
    #[allow(clippy::cast_possible_truncation)]
    let expected = snapshot.generation() as u8;

    match snapshot
        .data()
        .iter()
        .position(|byte| *byte != expected)
    {
        None => Ok(()),
        Some(offset) => Err(ValidationError::Torn {
            generation: snapshot.generation(),
            offset,
            expected,
            actual: snapshot.data().get(offset).copied().unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::initialize;
    use crate::mock::{MockDriver, TestPattern};
    use std::time::Duration;

    #[test]
    fn test_validate_generations_success() {
        assert_eq!(validate_generations(&[0, 1, 1, 4, 9]), Ok(()));
    }

    #[test]
    fn test_validate_generations_empty() {
        assert_eq!(validate_generations(&[]), Err(ValidationError::Empty));
    }

    #[test]
    fn test_validate_generations_regression() {
        assert_eq!(
            validate_generations(&[3, 5, 4]),
            Err(ValidationError::Regression {
                index: 2,
                previous: 5,
                current: 4
            })
        );
    }

    #[test]
    fn test_validate_fill_from_mock_stream() {
        let driver = MockDriver::new()
            .with_geometry(32, 16)
            .with_pattern(TestPattern::Generation)
            .with_frame_interval(Duration::from_millis(1));
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        handle.start(0).expect("start failed");

        let mut generations = Vec::new();
        for _ in 0..50 {
            let snapshot = handle.read().expect("read failed").snapshot();
            validate_generation_fill(&snapshot).expect("snapshot should be whole");
            generations.push(snapshot.generation());
        }
        handle.stop().expect("stop failed");

        assert_eq!(validate_generations(&generations), Ok(()));
    }

    #[test]
    fn test_validate_fill_wrong_pattern() {
        let driver = MockDriver::new()
            .with_geometry(8, 8)
            .with_pattern(TestPattern::Solid([200, 0, 0]))
            .with_frame_interval(Duration::from_millis(1));
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        handle.start(0).expect("start failed");

        let snapshot = loop {
            let snapshot = handle.read().expect("read failed").snapshot();
            if snapshot.generation() > 0 {
                break snapshot;
            }
            std::thread::yield_now();
        };
        handle.stop().expect("stop failed");

        assert!(matches!(
            validate_generation_fill(&snapshot),
            Err(ValidationError::Torn { .. })
        ));
    }
}
