//! Defer-until rules for comparison operands
//!
//! A sensor operand with a history window stays decisive while the reading
//! that decided the comparison is still inside the window, but only for the
//! (comparator, reduction, result, side) combinations listed here. Any other
//! combination cannot predict stability and re-evaluates immediately.

use ctx_core::{Comparator, HistoryReductionMode, TriState};

/// Which operand of a comparison is being examined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Whether the window-slide candidate of an operand can be trusted
pub fn candidate_usable(
    op: Comparator,
    mode: HistoryReductionMode,
    result: TriState,
    side: Side,
) -> bool {
    use HistoryReductionMode as Mode;

    match (op, result) {
        (_, TriState::Undefined) => false,
        (Comparator::Eq | Comparator::Regex | Comparator::Contains, TriState::True) => mode == Mode::Any,
        (Comparator::Eq | Comparator::Regex | Comparator::Contains, TriState::False) => mode == Mode::All,
        (Comparator::Neq, TriState::True) => mode == Mode::All,
        (Comparator::Neq, TriState::False) => mode == Mode::Any,
        (Comparator::Gt | Comparator::Gte | Comparator::Lt | Comparator::Lte, result) => {
            let greater = matches!(op, Comparator::Gt | Comparator::Gte);
            // Extreme of this operand that keeps the comparison true
            let (holding, breaking) = if greater == (side == Side::Left) {
                (Mode::Max, Mode::Min)
            } else {
                (Mode::Min, Mode::Max)
            };
            if result == TriState::True {
                mode == holding || mode == Mode::Any
            } else {
                mode == breaking || mode == Mode::All
            }
        }
    }
}
