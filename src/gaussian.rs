//! Linear algebra over the constraint set.
//!
//! Constraints are equations `Σ x_i = minesRemaining` over their unknowns
//! (x_i = 0 safe, 1 mine). This module groups them into connected
//! components, reduces each system to RREF with partial pivoting, and
//! provides a least-squares fallback for components too large to enumerate.
//! Every solver returns `None` on singular or inconsistent input instead of
//! failing.

use std::collections::{HashMap, HashSet};

use crate::grid::Grid;
use crate::types::{cell_key, Position};

/// Pivots smaller than this are treated as zero.
pub const PIVOT_EPS: f64 = 1e-10;

/// Tolerance when deciding that a value or bound equals an integer target.
pub const ROUND_TOL: f64 = 0.01;

/// Ridge term added to the normal equations so rank-deficient systems still
/// have a unique (near minimum-norm) solution.
const RIDGE: f64 = 1e-6;

/// A maximal set of constraints connected through shared unknowns.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Indices into `Grid::constraints`.
    pub constraints: Vec<usize>,
    /// Unknown cells covered by those constraints, in discovery order.
    pub cells: Vec<Position>,
}

/// Cells proven by elimination.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LinearDeduction {
    pub mines: Vec<Position>,
    pub safe: Vec<Position>,
}

/// Decompose the constraint set into connected components using BFS.
///
/// Constraints without unknowns are skipped. Expects up-to-date constraints.
pub fn connected_components(grid: &Grid) -> Vec<Component> {
    let constraints = grid.constraints();
    let mut visited = vec![false; constraints.len()];
    let mut components = Vec::new();

    for start in 0..constraints.len() {
        if visited[start] || constraints[start].unknowns.is_empty() {
            continue;
        }

        let mut ids = Vec::new();
        let mut cells = Vec::new();
        let mut seen_cells: HashSet<u32> = HashSet::new();
        let mut queue = vec![start];
        visited[start] = true;

        let mut head = 0;
        while head < queue.len() {
            let id = queue[head];
            head += 1;
            ids.push(id);

            for &pos in &constraints[id].unknowns {
                if !seen_cells.insert(cell_key(pos.0, pos.1)) {
                    continue;
                }
                cells.push(pos);
                for &other in grid.cell(pos).constraints() {
                    if !visited[other] {
                        visited[other] = true;
                        queue.push(other);
                    }
                }
            }
        }

        components.push(Component { constraints: ids, cells });
    }

    components
}

/// Build the augmented matrix `[A | b]` for a component.
///
/// Row `i` corresponds to `component.constraints[i]`, column `j` to
/// `component.cells[j]`.
pub fn build_system(grid: &Grid, component: &Component) -> Vec<Vec<f64>> {
    let n = component.cells.len();
    let index: HashMap<u32, usize> = component
        .cells
        .iter()
        .enumerate()
        .map(|(i, &(r, c))| (cell_key(r, c), i))
        .collect();

    component
        .constraints
        .iter()
        .map(|&id| {
            let constraint = &grid.constraints()[id];
            let mut row = vec![0.0; n + 1];
            for &(r, c) in &constraint.unknowns {
                if let Some(&j) = index.get(&cell_key(r, c)) {
                    row[j] = 1.0;
                }
            }
            row[n] = constraint.mines_remaining as f64;
            row
        })
        .collect()
}

/// Reduce `[A | b]` (n variable columns) to reduced row echelon form in place,
/// choosing the largest-magnitude pivot in each column. Returns the pivot
/// column of each leading row.
pub fn compute_rref(matrix: &mut [Vec<f64>], n: usize) -> Vec<usize> {
    let m = matrix.len();
    let mut pivots = Vec::new();
    let mut row = 0;

    for col in 0..n {
        if row >= m {
            break;
        }

        let (best, magnitude) = (row..m)
            .map(|r| (r, matrix[r][col].abs()))
            .fold((row, 0.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if magnitude < PIVOT_EPS {
            continue;
        }
        matrix.swap(row, best);

        let inv = 1.0 / matrix[row][col];
        for v in matrix[row].iter_mut() {
            *v *= inv;
        }

        let pivot_row = matrix[row].clone();
        for (k, other) in matrix.iter_mut().enumerate() {
            if k == row {
                continue;
            }
            let factor = other[col];
            if factor.abs() > PIVOT_EPS {
                for (v, p) in other.iter_mut().zip(&pivot_row) {
                    *v -= factor * p;
                }
            }
        }

        pivots.push(col);
        row += 1;
    }

    pivots
}

/// True if some reduced row reads `0 = b` with `b` away from zero.
fn is_inconsistent(matrix: &[Vec<f64>], n: usize) -> bool {
    matrix.iter().any(|row| {
        row[..n].iter().all(|v| v.abs() < PIVOT_EPS) && row[n].abs() > ROUND_TOL
    })
}

/// Derive certain cells for one component by elimination.
///
/// A reduced row pins every unknown in it when its right-hand side equals
/// the sum of its positive coefficients (those are mines, negative ones safe)
/// or the sum of its negative coefficients (the reverse). A row with a single
/// unknown is the special case of a directly determined value. Returns `None`
/// when the system is empty, has no pivots or is inconsistent.
pub fn solve_component(grid: &Grid, component: &Component) -> Option<LinearDeduction> {
    let n = component.cells.len();
    if n == 0 || component.constraints.is_empty() {
        return None;
    }

    let mut matrix = build_system(grid, component);
    let pivots = compute_rref(&mut matrix, n);
    if pivots.is_empty() || is_inconsistent(&matrix, n) {
        return None;
    }

    let mut mines = Vec::new();
    let mut safe = Vec::new();
    let mut mine_keys = HashSet::new();
    let mut safe_keys = HashSet::new();

    for row in &matrix {
        let target = row[n];
        let mut min_val = 0.0;
        let mut max_val = 0.0;
        let mut vars = Vec::new();

        for (j, &coeff) in row[..n].iter().enumerate() {
            if coeff.abs() > PIVOT_EPS {
                if coeff > 0.0 {
                    max_val += coeff;
                } else {
                    min_val += coeff;
                }
                vars.push(j);
            }
        }
        if vars.is_empty() {
            continue;
        }

        let positive_are_mines = if (target - max_val).abs() < ROUND_TOL {
            true
        } else if (target - min_val).abs() < ROUND_TOL {
            false
        } else {
            continue;
        };

        for &j in &vars {
            let cell = component.cells[j];
            let key = cell_key(cell.0, cell.1);
            if (row[j] > 0.0) == positive_are_mines {
                if mine_keys.insert(key) {
                    mines.push(cell);
                }
            } else if safe_keys.insert(key) {
                safe.push(cell);
            }
        }
    }

    Some(LinearDeduction { mines, safe })
}

/// Solve the square system `a x = b` by Gaussian elimination with partial
/// pivoting and back substitution. `None` if singular.
pub fn solve_square(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n {
        return None;
    }

    for col in 0..n {
        let (best, magnitude) = (col..n)
            .map(|r| (r, a[r][col].abs()))
            .fold((col, 0.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if magnitude < PIVOT_EPS {
            return None;
        }
        a.swap(col, best);
        b.swap(col, best);

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col];
        for r in (col + 1)..n {
            let factor = a[r][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for (v, p) in a[r][col..].iter_mut().zip(&pivot_row[col..]) {
                *v -= factor * p;
            }
            b[r] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0; n];
    for r in (0..n).rev() {
        let tail: f64 = ((r + 1)..n).map(|j| a[r][j] * x[j]).sum();
        x[r] = (b[r] - tail) / a[r][r];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Least-squares solution of `[A | b]` via the (ridge-regularized) normal
/// equations `(AᵀA + λI) x = Aᵀb`.
pub fn least_squares(system: &[Vec<f64>], n: usize) -> Option<Vec<f64>> {
    if system.is_empty() || n == 0 {
        return None;
    }

    let mut ata = vec![vec![0.0; n]; n];
    let mut atb = vec![0.0; n];
    for row in system {
        let b = row[n];
        for i in 0..n {
            let ai = row[i];
            if ai == 0.0 {
                continue;
            }
            atb[i] += ai * b;
            for j in 0..n {
                ata[i][j] += ai * row[j];
            }
        }
    }
    for (i, row) in ata.iter_mut().enumerate() {
        row[i] += RIDGE;
    }

    solve_square(ata, atb)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_rref_simple() {
        // x + y = 1, x = 1  =>  x = 1, y = 0
        let mut matrix = vec![vec![1.0, 1.0, 1.0], vec![1.0, 0.0, 1.0]];
        let pivots = compute_rref(&mut matrix, 2);
        assert_eq!(pivots, vec![0, 1]);
        assert!((matrix[0][0] - 1.0).abs() < EPS);
        assert!(matrix[0][1].abs() < EPS);
        assert!((matrix[0][2] - 1.0).abs() < EPS);
        assert!(matrix[1][0].abs() < EPS);
        assert!((matrix[1][1] - 1.0).abs() < EPS);
        assert!(matrix[1][2].abs() < EPS);
    }

    #[test]
    fn test_rref_underdetermined() {
        let mut matrix = vec![vec![1.0, 1.0, 1.0]];
        let pivots = compute_rref(&mut matrix, 2);
        assert_eq!(pivots, vec![0]);
        assert!((matrix[0][1] - 1.0).abs() < EPS);
    }

    #[test]
    fn test_rref_zero_matrix_has_no_pivots() {
        let mut matrix = vec![vec![0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]];
        assert!(compute_rref(&mut matrix, 2).is_empty());
    }

    #[test]
    fn test_solve_square_singular() {
        let a = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(solve_square(a, vec![1.0, 1.0]).is_none());
    }

    #[test]
    fn test_solve_square() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_square(a, vec![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-9);
        assert!((x[1] - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_least_squares_symmetric_split() {
        // x + y = 1 has minimum-norm solution (0.5, 0.5).
        let x = least_squares(&[vec![1.0, 1.0, 1.0]], 2).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-4);
        assert!((x[1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_components() {
        // Two 1s far apart on a wide board form two components.
        let mut grid = Grid::from_ascii(&[".......", ".1...1.", "......."]);
        grid.ensure_constraints();
        let comps = connected_components(&grid);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].cells.len(), 8);

        // Neighbouring 1s share unknowns.
        let mut grid = Grid::from_ascii(&["....", ".11.", "...."]);
        grid.ensure_constraints();
        let comps = connected_components(&grid);
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].constraints, vec![0, 1]);
        assert_eq!(comps[0].cells.len(), 10);
    }

    #[test]
    fn test_solve_component_one_two_one() {
        // Bottom row revealed 1 2 1 against a wall of unknowns:
        // mines sit diagonal to the 2, the cell facing it is safe.
        let mut grid = Grid::from_ascii(&["...", "121"]);
        grid.ensure_constraints();
        let comps = connected_components(&grid);
        assert_eq!(comps.len(), 1);
        let result = solve_component(&grid, &comps[0]).unwrap();
        let mut mines = result.mines.clone();
        mines.sort();
        assert_eq!(mines, vec![(0, 0), (0, 2)]);
        assert_eq!(result.safe, vec![(0, 1)]);
    }

    #[test]
    fn test_solve_component_inconsistent() {
        // A 2 with only one unknown cell left cannot be satisfied.
        let mut grid = Grid::from_ascii(&["._", "2_"]);
        grid.ensure_constraints();
        let comps = connected_components(&grid);
        assert!(solve_component(&grid, &comps[0]).is_none());
    }
}
