//! 3x3 reel grid with five fixed lines and a scatter bonus.

use crate::errors::ValidationError;
use crate::fairness::{bounded_ints, Draw, SeedPair};
use crate::games::types::floor_to_places;
use serde::{Deserialize, Serialize};

pub const REELS: usize = 3;
pub const CELLS: usize = REELS * REELS;

/// Cells in row-major order: three rows, then both diagonals
pub const LINES: [[usize; 3]; 5] = [[0, 1, 2], [3, 4, 5], [6, 7, 8], [0, 4, 8], [2, 4, 6]];

const SYMBOL_COUNT: u64 = 8;
const CELL_DRAW: Draw = Draw::sequence(CELLS, SYMBOL_COUNT, 2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Symbol {
    Cherry,
    Lemon,
    Orange,
    Plum,
    Bell,
    Bar,
    Seven,
    Scatter,
}

impl Symbol {
    const ALL: [Symbol; 8] = [
        Symbol::Cherry,
        Symbol::Lemon,
        Symbol::Orange,
        Symbol::Plum,
        Symbol::Bell,
        Symbol::Bar,
        Symbol::Seven,
        Symbol::Scatter,
    ];

    fn from_index(index: u64) -> Symbol {
        Self::ALL[(index % SYMBOL_COUNT) as usize]
    }

    /// Bet multiple for three in a line, before splitting across lines
    pub fn line_pay(self) -> f64 {
        match self {
            Symbol::Cherry => 15.0,
            Symbol::Lemon => 25.0,
            Symbol::Orange => 35.0,
            Symbol::Plum => 45.0,
            Symbol::Bell => 70.0,
            Symbol::Bar => 100.0,
            Symbol::Seven => 170.0,
            Symbol::Scatter => 0.0,
        }
    }
}

/// Scatter bonus applied to the summed line wins
pub fn scatter_multiplier(scatters: usize) -> f64 {
    match scatters {
        0..=2 => 1.0,
        3 => 2.0,
        _ => 5.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineWin {
    pub line: usize,
    pub symbol: Symbol,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotsSpin {
    /// Row-major 3x3 grid
    pub grid: Vec<Symbol>,
    pub line_wins: Vec<LineWin>,
    pub scatters: usize,
    pub multiplier: f64,
}

pub fn evaluate(seed: &SeedPair) -> Result<SlotsSpin, ValidationError> {
    let grid: Vec<Symbol> = bounded_ints(seed, None, CELL_DRAW)?
        .into_iter()
        .map(Symbol::from_index)
        .collect();
    Ok(score(grid))
}

/// Pay out a finished grid.
pub fn score(grid: Vec<Symbol>) -> SlotsSpin {
    let line_wins: Vec<LineWin> = LINES
        .iter()
        .enumerate()
        .filter_map(|(line, cells)| {
            let symbol = grid[cells[0]];
            let matched = symbol != Symbol::Scatter && cells.iter().all(|c| grid[*c] == symbol);
            matched.then(|| LineWin {
                line,
                symbol,
                multiplier: symbol.line_pay() / LINES.len() as f64,
            })
        })
        .collect();

    let scatters = grid.iter().filter(|s| **s == Symbol::Scatter).count();
    let line_total: f64 = line_wins.iter().map(|w| w.multiplier).sum();

    SlotsSpin {
        multiplier: floor_to_places(line_total * scatter_multiplier(scatters), 4),
        grid,
        line_wins,
        scatters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::derive_for;
    use super::Symbol::*;

    #[test]
    fn test_grid_comes_from_two_char_chunks() {
        let seed = SeedPair::from_parts("5a".repeat(32), "slots-client", 11).unwrap();
        let digest = derive_for(&seed, None);
        let spin = evaluate(&seed).unwrap();
        for (i, symbol) in spin.grid.iter().enumerate() {
            let raw = u64::from_str_radix(&digest[i * 2..i * 2 + 2], 16).unwrap();
            assert_eq!(*symbol, Symbol::from_index(raw));
        }
    }

    #[test]
    fn test_single_line_pays_a_fifth() {
        let spin = score(vec![Bell, Bell, Bell, Cherry, Lemon, Plum, Orange, Bar, Seven]);
        assert_eq!(spin.line_wins.len(), 1);
        assert_eq!(spin.line_wins[0].line, 0);
        assert_eq!(spin.multiplier, 14.0);
    }

    #[test]
    fn test_diagonals_pay() {
        let spin = score(vec![Seven, Cherry, Seven, Lemon, Seven, Plum, Seven, Bar, Seven]);
        assert_eq!(spin.line_wins.len(), 2);
        assert_eq!(spin.multiplier, 68.0);
    }

    #[test]
    fn test_scatter_boosts_line_total() {
        let three = score(vec![Cherry, Cherry, Cherry, Scatter, Lemon, Scatter, Scatter, Bar, Plum]);
        assert_eq!(three.scatters, 3);
        assert_eq!(three.multiplier, 6.0);

        let four = score(vec![Cherry, Cherry, Cherry, Scatter, Scatter, Scatter, Scatter, Bar, Plum]);
        assert_eq!(four.multiplier, 15.0);
    }

    #[test]
    fn test_scatter_lines_and_blanks_pay_nothing() {
        let spin = score(vec![Scatter, Scatter, Scatter, Cherry, Lemon, Plum, Orange, Bar, Seven]);
        assert!(spin.line_wins.is_empty());
        assert_eq!(spin.multiplier, 0.0);
    }
}
