use std::borrow::Cow;

use crate::instance::Instance;

use super::column_pool::Pattern;

/// Shadow prices of one RMP(k) relaxation, grouped by row family.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MasterDuals {
    /// Per item coverage row (`<=`, so `>= 0`).
    pub coverage: Vec<f64>,
    /// Per order disjointness row.
    pub orders: Vec<f64>,
    /// Per aisle row, free when the aisle is pinned.
    pub aisles: Vec<f64>,
    /// Lower unit bound (`>=`, so `<= 0`).
    pub lower: f64,
    pub upper: f64,
    pub cardinality: f64,
}

impl MasterDuals {
    /// Wentges smoothing: `alpha * self + (1 - alpha) * real`.
    /// Borrows `real` when `alpha <= 0`.
    pub fn linear_combination<'a>(&self, alpha: f64, real: &'a MasterDuals) -> Cow<'a, MasterDuals> {
        if alpha <= 0.0 {
            return Cow::Borrowed(real);
        }
        let mix = |c: f64, r: f64| alpha * c + (1.0 - alpha) * r;
        let mix_vec = |c: &[f64], r: &[f64]| c.iter().zip(r).map(|(&c, &r)| mix(c, r)).collect();
        Cow::Owned(MasterDuals {
            coverage: mix_vec(&self.coverage, &real.coverage),
            orders: mix_vec(&self.orders, &real.orders),
            aisles: mix_vec(&self.aisles, &real.aisles),
            lower: mix(self.lower, real.lower),
            upper: mix(self.upper, real.upper),
            cardinality: mix(self.cardinality, real.cardinality),
        })
    }

    /// Replaces NaN by zero and clamps everything into `[-cap, cap]`.
    pub fn sanitized(mut self, cap: f64) -> MasterDuals {
        let fix = |v: &mut f64| {
            *v = if v.is_nan() { 0.0 } else { v.clamp(-cap, cap) };
        };
        self.coverage.iter_mut().for_each(fix);
        self.orders.iter_mut().for_each(fix);
        self.aisles.iter_mut().for_each(fix);
        fix(&mut self.lower);
        fix(&mut self.upper);
        fix(&mut self.cardinality);
        self
    }

    /// Contribution of a single order to any pattern containing it.
    pub fn order_price(&self, instance: &Instance, order: usize) -> f64 {
        let units = instance.order_units(order) as f64;
        let consumed: f64 = instance
            .order_demand(order)
            .iter()
            .zip(&self.coverage)
            .filter(|(d, _)| **d > 0)
            .map(|(&d, &pi)| pi * f64::from(d))
            .sum();
        units - consumed - self.orders[order] - units * (self.lower + self.upper)
    }

    /// Order independent part of a pattern's reduced cost for an aisle.
    pub fn aisle_constant(&self, instance: &Instance, aisle: usize) -> f64 {
        let brought: f64 = instance
            .aisle_supply(aisle)
            .iter()
            .zip(&self.coverage)
            .map(|(&s, &pi)| pi * f64::from(s))
            .sum();
        brought - self.aisles[aisle] - self.cardinality
    }

    pub fn reduced_cost(&self, instance: &Instance, pattern: &Pattern) -> f64 {
        self.aisle_constant(instance, pattern.aisle)
            + pattern
                .orders
                .iter()
                .map(|&o| self.order_price(instance, o))
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duals() -> MasterDuals {
        MasterDuals {
            coverage: vec![0.5, 0.0],
            orders: vec![1.0, 0.0],
            aisles: vec![0.25, 0.0],
            lower: -0.5,
            upper: 0.25,
            cardinality: 2.0,
        }
    }

    #[test]
    fn reduced_cost_splits_into_orders_and_aisle() {
        let inst = Instance::new(vec![vec![2, 1], vec![0, 3]], vec![vec![3, 4], vec![1, 1]], 0, 10).unwrap();
        let d = duals();
        // order 0: 3 - 0.5*2 - 1 - 3*(-0.25) = 1.75
        assert!((d.order_price(&inst, 0) - 1.75).abs() < 1e-12);
        // aisle 0: 0.5*3 - 0.25 - 2 = -0.75
        assert!((d.aisle_constant(&inst, 0) + 0.75).abs() < 1e-12);
        let p = Pattern::new(&inst, 0, [0]);
        assert!((d.reduced_cost(&inst, &p) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn smoothing_borrows_without_alpha() {
        let center = duals();
        let real = MasterDuals {
            lower: 0.0,
            upper: 1.25,
            ..duals()
        };
        assert!(matches!(center.linear_combination(0.0, &real), Cow::Borrowed(_)));
        let mixed = center.linear_combination(0.5, &real);
        assert!((mixed.upper - 0.75).abs() < 1e-12);
        assert!((mixed.lower + 0.25).abs() < 1e-12);
    }

    #[test]
    fn sanitizing_clamps_non_finite_values() {
        let d = MasterDuals {
            coverage: vec![f64::NAN, f64::INFINITY],
            cardinality: f64::NEG_INFINITY,
            ..duals()
        }
        .sanitized(1e9);
        assert_eq!(d.coverage, vec![0.0, 1e9]);
        assert_eq!(d.cardinality, -1e9);
    }
}
