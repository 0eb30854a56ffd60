use crate::core::particle::{Particle, SpeciesId};
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::BTreeMap;

/// A reaction `reactants -> products` with rate constant `k`.
///
/// Unimolecular rules have a first-order rate (1/time), bimolecular rules
/// an intrinsic second-order rate (volume/time).
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRule {
    pub reactants: Vec<SpeciesId>,
    pub products: Vec<SpeciesId>,
    pub k: f64,
}

impl ReactionRule {
    /// Errors:
    /// - `Error::InvalidParam` for a non-finite or negative `k`, no or more than two
    ///   reactants, more than two products of a unimolecular rule, or more than one
    ///   product of a bimolecular rule.
    pub fn new(reactants: Vec<SpeciesId>, products: Vec<SpeciesId>, k: f64) -> Result<Self> {
        if !k.is_finite() || k < 0.0 {
            return Err(Error::InvalidParam("rate constant must be finite and >= 0".into()));
        }
        match (reactants.len(), products.len()) {
            (1, 0..=2) | (2, 0..=1) => {}
            (1 | 2, n) => {
                return Err(Error::InvalidParam(format!(
                    "{}-reactant rules support at most {} products, got {n}",
                    reactants.len(),
                    3 - reactants.len()
                )))
            }
            (n, _) => {
                return Err(Error::InvalidParam(format!(
                    "rules need one or two reactants, got {n}"
                )))
            }
        }
        Ok(Self {
            reactants,
            products,
            k,
        })
    }

    pub fn unimolecular(reactant: SpeciesId, products: Vec<SpeciesId>, k: f64) -> Result<Self> {
        Self::new(vec![reactant], products, k)
    }

    pub fn bimolecular(
        a: SpeciesId,
        b: SpeciesId,
        products: Vec<SpeciesId>,
        k: f64,
    ) -> Result<Self> {
        Self::new(vec![a, b], products, k)
    }
}

/// Sum of the rate constants of `rules`.
pub fn total_rate(rules: &[ReactionRule]) -> f64 {
    rules.iter().map(|r| r.k).sum()
}

/// Picks one rule with probability proportional to its rate constant.
///
/// Returns `None` if no rule has a positive rate.
pub fn draw_rule<'a, R: Rng + ?Sized>(
    rules: &'a [ReactionRule],
    rng: &mut R,
) -> Option<&'a ReactionRule> {
    let k_tot = total_rate(rules);
    if k_tot <= 0.0 {
        return None;
    }
    let target = rng.random::<f64>() * k_tot;
    let mut acc = 0.0;
    for rule in rules {
        acc += rule.k;
        if target < acc {
            return Some(rule);
        }
    }
    rules.iter().rev().find(|r| r.k > 0.0)
}

/// Reaction rule lookup table keyed by the (sorted) reactant species.
#[derive(Debug, Clone, Default)]
pub struct NetworkRules {
    rules: BTreeMap<Vec<SpeciesId>, Vec<ReactionRule>>,
}

impl NetworkRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reaction_rule(&mut self, rule: ReactionRule) {
        let mut key = rule.reactants.clone();
        key.sort();
        self.rules.entry(key).or_default().push(rule);
    }

    /// Unimolecular rules of `species`, in insertion order.
    pub fn query_reaction_rule(&self, species: SpeciesId) -> &[ReactionRule] {
        self.rules
            .get(&vec![species])
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Bimolecular rules for the unordered pair `(a, b)`, in insertion order.
    pub fn query_reaction_rule_pair(&self, a: SpeciesId, b: SpeciesId) -> &[ReactionRule] {
        let key = if a <= b { vec![a, b] } else { vec![b, a] };
        self.rules.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One executed reaction: the rule, the consumed particles and the products.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRecord {
    pub rule: ReactionRule,
    pub reactants: Vec<Particle>,
    pub products: Vec<Particle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const A: SpeciesId = SpeciesId(0);
    const B: SpeciesId = SpeciesId(1);
    const C: SpeciesId = SpeciesId(2);

    #[test]
    fn rule_shapes_are_validated() {
        assert!(ReactionRule::unimolecular(A, vec![B, C], 1.0).is_ok());
        assert!(ReactionRule::unimolecular(A, vec![B, C, C], 1.0).is_err());
        assert!(ReactionRule::bimolecular(A, B, vec![C], 1.0).is_ok());
        assert!(ReactionRule::bimolecular(A, B, vec![C, C], 1.0).is_err());
        assert!(ReactionRule::new(vec![], vec![], 1.0).is_err());
        assert!(ReactionRule::unimolecular(A, vec![], -1.0).is_err());
        assert!(ReactionRule::unimolecular(A, vec![], f64::INFINITY).is_err());
    }

    #[test]
    fn pair_query_is_order_independent() -> Result<()> {
        let mut rules = NetworkRules::new();
        rules.add_reaction_rule(ReactionRule::bimolecular(B, A, vec![C], 2.0)?);
        rules.add_reaction_rule(ReactionRule::unimolecular(A, vec![B], 1.0)?);
        assert_eq!(rules.query_reaction_rule_pair(A, B).len(), 1);
        assert_eq!(rules.query_reaction_rule_pair(B, A).len(), 1);
        assert_eq!(rules.query_reaction_rule(A).len(), 1);
        assert!(rules.query_reaction_rule(B).is_empty());
        assert_eq!(rules.len(), 2);
        Ok(())
    }

    #[test]
    fn draw_rule_is_weighted_by_rate() -> Result<()> {
        let rules = vec![
            ReactionRule::unimolecular(A, vec![B], 1.0)?,
            ReactionRule::unimolecular(A, vec![C], 3.0)?,
            ReactionRule::unimolecular(A, vec![], 0.0)?,
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let n = 20_000;
        let to_c = (0..n)
            .filter_map(|_| draw_rule(&rules, &mut rng))
            .filter(|r| r.products == vec![C])
            .count();
        let frac = to_c as f64 / n as f64;
        assert!((frac - 0.75).abs() < 0.02, "fraction {frac}");
        assert!(draw_rule(&rules[2..], &mut rng).is_none());
        Ok(())
    }
}
