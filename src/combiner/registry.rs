//! Static combiner registry keyed by [`StatisticKind`].

use super::{Combiner, ContingencyCombiner, MomentCombiner, PercentileCombiner, StatisticKind};

/// A fresh combiner for `kind`
pub fn create_combiner(kind: StatisticKind) -> Box<dyn Combiner> {
    match kind {
        StatisticKind::Mean | StatisticKind::Variance | StatisticKind::PearsonCorrelation => {
            Box::new(MomentCombiner::new(kind))
        }
        StatisticKind::ContingencyTable => Box::new(ContingencyCombiner::new()),
        StatisticKind::PercentileSketch => Box::new(PercentileCombiner::new()),
    }
}
