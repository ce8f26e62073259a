use crate::engines::evaluation::Fitness;
use crate::engines::generation::genome::{Genome, GenomeId};
use rand::seq::index;
use rand::Rng;
use std::cmp::Ordering;

/// Rank order: primary desc, secondary desc, then genome id asc.
pub fn rank_cmp(a: (GenomeId, &Fitness), b: (GenomeId, &Fitness)) -> Ordering {
    a.1.rank_cmp(b.1).then_with(|| a.0.cmp(&b.0))
}

/// Sort best-first.
pub fn rank_population(members: &mut [(Genome, Fitness)]) {
    members.sort_by(|a, b| rank_cmp((a.0.id, &a.1), (b.0.id, &b.1)));
}

/// Tournament selection over a ranked population: draw `tournament_size`
/// distinct members uniformly and return the index of the best one.
pub fn tournament_selection<R: Rng>(ranked: &[(Genome, Fitness)], tournament_size: usize, rng: &mut R) -> Option<usize> {
    if ranked.is_empty() {
        return None;
    }
    let k = tournament_size.clamp(1, ranked.len());
    index::sample(rng, ranked.len(), k)
        .into_iter()
        .min_by(|a, b| rank_cmp((ranked[*a].0.id, &ranked[*a].1), (ranked[*b].0.id, &ranked[*b].1)))
}
