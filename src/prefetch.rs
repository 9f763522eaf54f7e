/// Which way a window slot was reached from the current index. Backward
/// slots are the ones a decoder may fill more lazily.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WindowSlot {
    pub index: usize,
    pub direction: Direction,
}

/// Derives the set of list indices to keep resident around `current`.
///
/// The current index always comes first (direction Forward), then forward
/// neighbors mod `len`, then backward neighbors mod `len`, capped at
/// `min(len, 1 + forward + backward)` entries. Short lists never repeat an
/// index: the forward run is consecutive and the backward run fills only
/// the remainder.
pub fn prefetch_window(
    current: usize,
    len: usize,
    forward: usize,
    backward: usize,
) -> Vec<WindowSlot> {
    if len == 0 {
        return Vec::new();
    }
    let current = current.min(len - 1);

    let mut remaining = len.min(1 + forward + backward);
    let mut result = Vec::with_capacity(remaining);

    for base in 0..=forward {
        if remaining == 0 {
            break;
        }
        result.push(WindowSlot {
            index: (current + base) % len,
            direction: Direction::Forward,
        });
        remaining -= 1;
    }

    for base in 0..backward {
        if remaining == 0 {
            break;
        }
        result.push(WindowSlot {
            index: (current + len - 1 - base) % len,
            direction: Direction::Backward,
        });
        remaining -= 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(slots: &[WindowSlot]) -> Vec<usize> {
        slots.iter().map(|s| s.index).collect()
    }

    #[test]
    fn current_first_then_forward_then_backward() {
        let w = prefetch_window(5, 10, 2, 2);
        assert_eq!(indices(&w), [5, 6, 7, 4, 3]);
        assert_eq!(w[0].direction, Direction::Forward);
        assert_eq!(w[3].direction, Direction::Backward);
    }

    #[test]
    fn wraps_modulo_list_length() {
        let w = prefetch_window(9, 10, 2, 2);
        assert_eq!(indices(&w), [9, 0, 1, 8, 7]);

        let w = prefetch_window(0, 10, 2, 2);
        assert_eq!(indices(&w), [0, 1, 2, 9, 8]);
    }

    #[test]
    fn short_lists_yield_unique_indices() {
        for len in 1..=5 {
            for current in 0..len {
                let w = prefetch_window(current, len, 2, 2);
                assert_eq!(w.len(), len.min(5));
                let mut seen = indices(&w);
                seen.sort_unstable();
                seen.dedup();
                assert_eq!(seen.len(), w.len(), "duplicates for len={len} cur={current}");
            }
        }
    }

    #[test]
    fn empty_list_yields_empty_window() {
        assert!(prefetch_window(0, 0, 2, 2).is_empty());
    }

    #[test]
    fn single_entry_window_is_just_current() {
        let w = prefetch_window(0, 1, 2, 2);
        assert_eq!(indices(&w), [0]);
    }
}
