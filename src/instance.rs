//! Problem data: order demand, aisle supply and the wave size window.
//!
//! The text format is line oriented:
//!
//! ```text
//! O I A
//! k item qty item qty ...     (O order lines)
//! l item qty item qty ...     (A aisle lines)
//! LB UB
//! ```

use std::fmt::{Display, Formatter};
use std::io::BufRead;
use std::path::Path;

/// Immutable wave picking instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    num_items: usize,
    demand: Vec<Vec<u32>>,
    supply: Vec<Vec<u32>>,
    lower_bound: u64,
    upper_bound: u64,
    order_units: Vec<u64>,
}

impl Instance {
    /// Creates an instance from dense matrices.
    ///
    /// `demand[o][i]` and `supply[a][i]` must all have the same item count.
    pub fn new(
        demand: Vec<Vec<u32>>,
        supply: Vec<Vec<u32>>,
        lower_bound: u64,
        upper_bound: u64,
    ) -> Result<Self, InstanceError> {
        if lower_bound > upper_bound {
            return Err(InstanceError::InvalidBounds {
                lower: lower_bound,
                upper: upper_bound,
            });
        }

        let num_items = demand
            .first()
            .or_else(|| supply.first())
            .map_or(0, Vec::len);

        if let Some((index, row)) = demand.iter().enumerate().find(|(_, r)| r.len() != num_items) {
            return Err(InstanceError::RaggedRows {
                what: "order",
                index,
                expected: num_items,
                found: row.len(),
            });
        }
        if let Some((index, row)) = supply.iter().enumerate().find(|(_, r)| r.len() != num_items) {
            return Err(InstanceError::RaggedRows {
                what: "aisle",
                index,
                expected: num_items,
                found: row.len(),
            });
        }

        let order_units = demand
            .iter()
            .map(|row| row.iter().map(|&q| u64::from(q)).sum())
            .collect();

        Ok(Instance {
            num_items,
            demand,
            supply,
            lower_bound,
            upper_bound,
            order_units,
        })
    }

    /// Parses the line oriented instance format.
    pub fn parse(text: &str) -> Result<Self, InstanceError> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, InstanceError> {
        let file = std::fs::File::open(path).map_err(InstanceError::Io)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, InstanceError> {
        let mut lines = NumberedLines::new(reader);

        let (line_no, header) = lines.next_numbers()?;
        if header.len() < 3 {
            return Err(InstanceError::MissingPairs {
                line: line_no,
                expected: 3,
                found: header.len(),
            });
        }
        let num_orders = to_usize(header[0], line_no)?;
        let num_items = to_usize(header[1], line_no)?;
        let num_aisles = to_usize(header[2], line_no)?;

        let demand = (0..num_orders)
            .map(|_| lines.next_sparse_row(num_items))
            .collect::<Result<Vec<_>, _>>()?;
        let supply = (0..num_aisles)
            .map(|_| lines.next_sparse_row(num_items))
            .collect::<Result<Vec<_>, _>>()?;

        let (line_no, bounds) = lines.next_numbers()?;
        if bounds.len() < 2 {
            return Err(InstanceError::MissingPairs {
                line: line_no,
                expected: 2,
                found: bounds.len(),
            });
        }

        let mut instance = Self::new(demand, supply, bounds[0], bounds[1])?;
        // keep the declared item count even when there are no orders or aisles
        instance.num_items = num_items;
        Ok(instance)
    }

    #[inline]
    pub fn num_orders(&self) -> usize {
        self.demand.len()
    }

    #[inline]
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    #[inline]
    pub fn num_aisles(&self) -> usize {
        self.supply.len()
    }

    #[inline]
    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    #[inline]
    pub fn upper_bound(&self) -> u64 {
        self.upper_bound
    }

    #[inline]
    pub fn order_demand(&self, order: usize) -> &[u32] {
        &self.demand[order]
    }

    #[inline]
    pub fn aisle_supply(&self, aisle: usize) -> &[u32] {
        &self.supply[aisle]
    }

    /// Total units requested by a single order.
    #[inline]
    pub fn order_units(&self, order: usize) -> u64 {
        self.order_units[order]
    }

    pub fn units_of(&self, orders: &[usize]) -> u64 {
        orders.iter().map(|&o| self.order_units[o]).sum()
    }

    /// Aggregated demand per item of a set of orders.
    pub fn demand_of(&self, orders: &[usize]) -> Vec<u64> {
        let mut total = vec![0u64; self.num_items];
        for &o in orders {
            for (t, &q) in total.iter_mut().zip(&self.demand[o]) {
                *t += u64::from(q);
            }
        }
        total
    }

    /// Aggregated supply per item of a set of aisles.
    pub fn supply_of(&self, aisles: &[usize]) -> Vec<u64> {
        let mut total = vec![0u64; self.num_items];
        for &a in aisles {
            for (t, &q) in total.iter_mut().zip(&self.supply[a]) {
                *t += u64::from(q);
            }
        }
        total
    }

    /// Whether an order can be served by an aisle on its own.
    pub fn order_fits_aisle(&self, order: usize, aisle: usize) -> bool {
        self.demand[order]
            .iter()
            .zip(&self.supply[aisle])
            .all(|(d, s)| d <= s)
    }

    /// Pattern feasibility: the orders are jointly covered by the aisle alone.
    pub fn fits_aisle(&self, aisle: usize, orders: &[usize]) -> bool {
        self.demand_of(orders)
            .iter()
            .zip(&self.supply[aisle])
            .all(|(&d, &s)| d <= u64::from(s))
    }
}

struct NumberedLines<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> NumberedLines<R> {
    fn new(reader: R) -> Self {
        NumberedLines {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next non blank line parsed as unsigned numbers.
    fn next_numbers(&mut self) -> Result<(usize, Vec<u64>), InstanceError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Err(InstanceError::UnexpectedEof { line: self.line_no + 1 });
            };
            self.line_no += 1;
            let line = line.map_err(InstanceError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            let numbers = line
                .split_whitespace()
                .map(|token| {
                    token.parse::<u64>().map_err(|_| InstanceError::InvalidNumber {
                        line: self.line_no,
                        token: token.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok((self.line_no, numbers));
        }
    }

    /// `n (item qty)*n` into a dense row. A repeated item keeps the last quantity.
    fn next_sparse_row(&mut self, num_items: usize) -> Result<Vec<u32>, InstanceError> {
        let (line_no, numbers) = self.next_numbers()?;
        let Some((&count, pairs)) = numbers.split_first() else {
            return Err(InstanceError::MissingPairs { line: line_no, expected: 1, found: 0 });
        };
        let count = to_usize(count, line_no)?;
        if pairs.len() < 2 * count {
            return Err(InstanceError::MissingPairs {
                line: line_no,
                expected: count,
                found: pairs.len() / 2,
            });
        }

        let mut row = vec![0u32; num_items];
        for pair in pairs.chunks_exact(2).take(count) {
            let item = to_usize(pair[0], line_no)?;
            if item >= num_items {
                return Err(InstanceError::ItemOutOfRange {
                    line: line_no,
                    item,
                    items: num_items,
                });
            }
            row[item] = u32::try_from(pair[1]).map_err(|_| InstanceError::InvalidNumber {
                line: line_no,
                token: pair[1].to_string(),
            })?;
        }
        Ok(row)
    }
}

fn to_usize(value: u64, line: usize) -> Result<usize, InstanceError> {
    usize::try_from(value).map_err(|_| InstanceError::InvalidNumber {
        line,
        token: value.to_string(),
    })
}

#[derive(Debug)]
pub enum InstanceError {
    Io(std::io::Error),
    UnexpectedEof { line: usize },
    InvalidNumber { line: usize, token: String },
    MissingPairs { line: usize, expected: usize, found: usize },
    ItemOutOfRange { line: usize, item: usize, items: usize },
    InvalidBounds { lower: u64, upper: u64 },
    RaggedRows { what: &'static str, index: usize, expected: usize, found: usize },
}

impl Display for InstanceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceError::Io(e) => write!(f, "could not read instance: {e}"),
            InstanceError::UnexpectedEof { line } => {
                write!(f, "instance ended early, expected more data at line {line}")
            }
            InstanceError::InvalidNumber { line, token } => {
                write!(f, "line {line}: '{token}' is not a valid non-negative number")
            }
            InstanceError::MissingPairs { line, expected, found } => {
                write!(f, "line {line}: expected {expected} entries, found {found}")
            }
            InstanceError::ItemOutOfRange { line, item, items } => {
                write!(f, "line {line}: item {item} out of range (instance has {items} items)")
            }
            InstanceError::InvalidBounds { lower, upper } => {
                write!(f, "wave bounds are inverted: LB={lower} > UB={upper}")
            }
            InstanceError::RaggedRows { what, index, expected, found } => {
                write!(f, "{what} {index} has {found} items, expected {expected}")
            }
        }
    }
}

impl std::error::Error for InstanceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstanceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "2 3 2\n\
                         2 0 3 2 1\n\
                         1 1 4\n\
                         2 0 5 2 2\n\
                         1 1 4\n\
                         1 8\n";

    #[test]
    fn parses_sparse_rows() {
        let inst = Instance::parse(SMALL).unwrap();
        assert_eq!(inst.num_orders(), 2);
        assert_eq!(inst.num_items(), 3);
        assert_eq!(inst.num_aisles(), 2);
        assert_eq!(inst.order_demand(0), &[3, 0, 1]);
        assert_eq!(inst.aisle_supply(0), &[5, 0, 2]);
        assert_eq!(inst.order_units(0), 4);
        assert_eq!(inst.order_units(1), 4);
        assert_eq!((inst.lower_bound(), inst.upper_bound()), (1, 8));
    }

    #[test]
    fn feasibility_helpers() {
        let inst = Instance::parse(SMALL).unwrap();
        assert!(inst.order_fits_aisle(0, 0));
        assert!(!inst.order_fits_aisle(0, 1));
        assert!(inst.fits_aisle(1, &[1]));
        assert!(!inst.fits_aisle(0, &[0, 1]));
        assert_eq!(inst.units_of(&[0, 1]), 8);
        assert_eq!(inst.demand_of(&[0, 1]), vec![3, 4, 1]);
        assert_eq!(inst.supply_of(&[0, 1]), vec![5, 4, 2]);
    }

    #[test]
    fn rejects_out_of_range_item() {
        let err = Instance::parse("1 1 1\n1 3 2\n1 0 1\n0 1\n").unwrap_err();
        assert!(matches!(err, InstanceError::ItemOutOfRange { line: 2, item: 3, items: 1 }));
    }

    #[test]
    fn rejects_truncated_file() {
        let err = Instance::parse("1 1 1\n1 0 2\n").unwrap_err();
        assert!(matches!(err, InstanceError::UnexpectedEof { .. }));
    }

    #[test]
    fn rejects_garbage_and_inverted_bounds() {
        let err = Instance::parse("1 1 x\n").unwrap_err();
        assert!(matches!(err, InstanceError::InvalidNumber { line: 1, .. }));

        let err = Instance::parse("1 1 1\n1 0 2\n1 0 2\n5 1\n").unwrap_err();
        assert!(matches!(err, InstanceError::InvalidBounds { lower: 5, upper: 1 }));
    }

    #[test]
    fn rejects_ragged_matrices() {
        let err = Instance::new(vec![vec![1, 2]], vec![vec![1]], 0, 1).unwrap_err();
        assert!(matches!(err, InstanceError::RaggedRows { what: "aisle", .. }));
    }
}
