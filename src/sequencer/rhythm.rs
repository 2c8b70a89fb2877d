// Rhythm generator - Euclidean distribution of fills across steps
// Bjorklund grouping, rotation applied as a separate cyclic shift

use crate::sequencer::error::ConfigurationError;

/// Generate the Euclidean rhythm E(fills, steps).
///
/// The sequence always opens on a fill when `fills > 0`, e.g. E(3, 8) is
/// `x..x..x.`. Fails when `fills > steps`.
pub fn generate(steps: u32, fills: u32) -> Result<Vec<bool>, ConfigurationError> {
    if fills > steps {
        return Err(ConfigurationError::FillsExceedSteps { fills, steps });
    }

    if fills == 0 {
        return Ok(vec![false; steps as usize]);
    }

    let mut front: Vec<Vec<bool>> = vec![vec![true]; fills as usize];
    let mut remainder: Vec<Vec<bool>> = vec![vec![false]; (steps - fills) as usize];

    while remainder.len() > 1 {
        let pairs = front.len().min(remainder.len());
        if pairs == 0 {
            break;
        }

        // Leftovers of whichever list is longer form the next remainder
        let leftover_front = front.split_off(pairs);
        let leftover_remainder = remainder.split_off(pairs);

        for (group, tail) in front.iter_mut().zip(remainder.drain(..)) {
            group.extend(tail);
        }

        remainder = if leftover_front.is_empty() {
            leftover_remainder
        } else {
            leftover_front
        };
    }

    Ok(front.into_iter().chain(remainder).flatten().collect())
}

/// Cyclic left shift: `rotated[i] == sequence[(i + rotation) mod len]`.
///
/// Negative rotations shift right.
pub fn rotate(sequence: &[bool], rotation: i32) -> Vec<bool> {
    if sequence.is_empty() {
        return Vec::new();
    }

    let offset = normalize_rotation(rotation, sequence.len() as u32) as usize;
    let mut rotated = Vec::with_capacity(sequence.len());
    rotated.extend_from_slice(&sequence[offset..]);
    rotated.extend_from_slice(&sequence[..offset]);
    rotated
}

/// Generate and rotate in one call
pub fn generate_rotated(
    steps: u32,
    fills: u32,
    rotation: i32,
) -> Result<Vec<bool>, ConfigurationError> {
    Ok(rotate(&generate(steps, fills)?, rotation))
}

/// Rotation taken mod steps, always in `0..steps`
pub fn normalize_rotation(rotation: i32, steps: u32) -> u32 {
    if steps == 0 {
        return 0;
    }
    (rotation as i64).rem_euclid(steps as i64) as u32
}

/// Render a sequence as `x` / `.` characters (logs and test failures)
pub fn to_pattern_string(sequence: &[bool]) -> String {
    sequence.iter().map(|&on| if on { 'x' } else { '.' }).collect()
}
