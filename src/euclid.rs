//! Euclidean rhythm generation via Bjorklund's algorithm.
//!
//! Distributes `pulses` as evenly as possible across `steps` slots by
//! repeatedly pairing group fronts with tails until fewer than two group
//! sizes remain. The result is rotated so the first pulse lands on slot 0,
//! which makes the distribution deterministic for ties.

/// Distribute `pulses` across `steps` slots.
///
/// Returns one flag per slot; `true` marks a pulse. `pulses >= steps`
/// yields all pulses, `pulses == 0` yields none.
pub fn bjorklund(pulses: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return Vec::new();
    }
    if pulses == 0 {
        return vec![false; steps];
    }
    if pulses >= steps {
        return vec![true; steps];
    }

    let mut counts = Vec::new();
    let mut remainders = vec![pulses];
    let mut divisor = steps - pulses;
    let mut level = 0usize;
    loop {
        counts.push(divisor / remainders[level]);
        remainders.push(divisor % remainders[level]);
        divisor = remainders[level];
        level += 1;
        if remainders[level] <= 1 {
            break;
        }
    }
    counts.push(divisor);

    fn build(level: isize, counts: &[usize], remainders: &[usize], pattern: &mut Vec<bool>) {
        match level {
            -1 => pattern.push(false),
            -2 => pattern.push(true),
            _ => {
                for _ in 0..counts[level as usize] {
                    build(level - 1, counts, remainders, pattern);
                }
                if remainders[level as usize] != 0 {
                    build(level - 2, counts, remainders, pattern);
                }
            }
        }
    }

    let mut pattern = Vec::with_capacity(steps);
    build(level as isize, &counts, &remainders, &mut pattern);

    // Normalize so the first pulse sits at slot 0.
    if let Some(first) = pattern.iter().position(|&b| b) {
        pattern.rotate_left(first);
    }
    pattern
}
