//! Enumeration of feasible one- and two-stop strategies.
//!
//! One representative stop lap is placed per feasible range (the floor
//! midpoint), so the search stays O(compounds²) for one stop and
//! O(compounds³ · life/2) for two stops instead of every lap combination.
//! Placement must stay deterministic: dedup bins on the chosen stop laps.

use crate::types::{
    Compound, LifeBounds, PitWindow, StrategyCandidate, StrategyType, TyreLifeBounds,
};

/// Bounds assumed for a compound missing from the table.
const ONE_STOP_FALLBACK: LifeBounds = LifeBounds::new(10, 20);
const TWO_STOP_FALLBACK: LifeBounds = LifeBounds::new(8, 16);
const TWO_STOP_SCAN_STEP: usize = 2;
const TWO_STOP_WINDOW: u32 = 2;

pub fn generate(total_laps: u32, bounds: &TyreLifeBounds) -> Vec<StrategyCandidate> {
    let compounds: Vec<Compound> = if bounds.is_empty() {
        Compound::ALL.to_vec()
    } else {
        bounds.keys().copied().collect()
    };
    let total = i64::from(total_laps);
    let life = |c: Compound, fallback: LifeBounds| {
        let b = bounds.get(&c).copied().unwrap_or(fallback);
        (i64::from(b.min), i64::from(b.max))
    };

    let mut out = Vec::new();

    for &c1 in &compounds {
        for &c2 in &compounds {
            if c1 == c2 {
                continue;
            }
            let (min1, max1) = life(c1, ONE_STOP_FALLBACK);
            let (min2, max2) = life(c2, ONE_STOP_FALLBACK);
            let lo = min1.max(total - max2).max(1);
            let hi = max1.min(total - min2).min(total - 1);
            if lo > hi {
                continue;
            }
            let stop = (lo + hi) / 2;
            out.push(StrategyCandidate {
                index: out.len(),
                strategy_type: StrategyType::OneStop,
                compounds: vec![c1, c2],
                stint_lengths: vec![stop as u32, (total - stop) as u32],
                pit_windows: vec![PitWindow {
                    lap_min: lo as u32,
                    lap_max: hi as u32,
                }],
                stop_laps: vec![stop as u32],
            });
        }
    }

    for &c1 in &compounds {
        for &c2 in &compounds {
            for &c3 in &compounds {
                if c1 == c2 && c2 == c3 {
                    continue;
                }
                let (min1, max1) = life(c1, TWO_STOP_FALLBACK);
                let (min2, max2) = life(c2, TWO_STOP_FALLBACK);
                let (min3, max3) = life(c3, TWO_STOP_FALLBACK);

                for stop1 in (min1.max(1)..=max1).step_by(TWO_STOP_SCAN_STEP) {
                    let remaining = total - stop1;
                    let lo = min2.max(remaining - max3).max(1);
                    let hi = max2.min(remaining - min3).min(remaining - 1);
                    if lo > hi {
                        continue;
                    }
                    let stop2 = stop1 + (lo + hi) / 2;
                    let len3 = total - stop2;
                    if len3 < min3.max(1) || len3 > max3 {
                        continue;
                    }
                    let (s1, s2) = (stop1 as u32, stop2 as u32);
                    out.push(StrategyCandidate {
                        index: out.len(),
                        strategy_type: StrategyType::TwoStop,
                        compounds: vec![c1, c2, c3],
                        stint_lengths: vec![s1, s2 - s1, len3 as u32],
                        pit_windows: vec![window(s1), window(s2)],
                        stop_laps: vec![s1, s2],
                    });
                }
            }
        }
    }

    tracing::debug!(total_laps, candidates = out.len(), "generated strategy candidates");
    out
}

fn window(stop: u32) -> PitWindow {
    PitWindow {
        lap_min: stop.saturating_sub(TWO_STOP_WINDOW),
        lap_max: stop + TWO_STOP_WINDOW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_tyre_life_bounds;

    fn one_stop(cands: &[StrategyCandidate], c1: Compound, c2: Compound) -> Option<&StrategyCandidate> {
        cands
            .iter()
            .find(|c| c.strategy_type == StrategyType::OneStop && c.compounds == [c1, c2])
    }

    #[test]
    fn infeasible_one_stop_is_excluded() {
        let cands = generate(57, &default_tyre_life_bounds());
        // [max(12, 23), min(18, 33)] = [23, 18]
        assert!(one_stop(&cands, Compound::Soft, Compound::Hard).is_none());
    }

    #[test]
    fn one_stop_uses_floor_midpoint_and_full_window() {
        let cands = generate(57, &default_tyre_life_bounds());
        let mh = one_stop(&cands, Compound::Medium, Compound::Hard).unwrap();
        assert_eq!(mh.stop_laps, vec![24]);
        assert_eq!(mh.stint_lengths, vec![24, 33]);
        assert_eq!(mh.pit_windows, vec![PitWindow { lap_min: 23, lap_max: 26 }]);
    }

    #[test]
    fn stints_sum_and_stops_increase() {
        for laps in [44, 53, 57, 66, 78] {
            let cands = generate(laps, &default_tyre_life_bounds());
            assert!(!cands.is_empty(), "{laps} laps produced nothing");
            for c in &cands {
                assert_eq!(c.stint_lengths.iter().sum::<u32>(), laps);
                assert_eq!(c.compounds.len(), c.stop_laps.len() + 1);
                assert!(c.stop_laps.windows(2).all(|w| w[0] < w[1]));
                assert!(c.stop_laps.iter().all(|&s| s > 0 && s < laps));
                assert!(c.stint_lengths.iter().all(|&l| l > 0));
            }
        }
    }

    #[test]
    fn two_stop_needs_two_compounds_and_scans_by_two() {
        let cands = generate(57, &default_tyre_life_bounds());
        let two: Vec<_> = cands
            .iter()
            .filter(|c| c.strategy_type == StrategyType::TwoStop)
            .collect();
        assert!(!two.is_empty());
        for c in &two {
            let mut distinct = c.compounds.clone();
            distinct.dedup();
            distinct.sort();
            distinct.dedup();
            assert!(distinct.len() >= 2);
            let first = default_tyre_life_bounds()[&c.compounds[0]];
            assert_eq!((c.stop_laps[0] - first.min) % 2, 0);
            assert_eq!(c.pit_windows[1].lap_max - c.pit_windows[1].lap_min, 4);
        }
    }

    #[test]
    fn two_stop_places_second_stop_at_midpoint() {
        let cands = generate(57, &default_tyre_life_bounds());
        // SOFT 12 laps, then MEDIUM range [max(18, 45-26), min(26, 45-18)] = [19, 26] -> 22
        let c = cands
            .iter()
            .find(|c| {
                c.compounds == [Compound::Soft, Compound::Medium, Compound::Medium]
                    && c.stop_laps[0] == 12
            })
            .unwrap();
        assert_eq!(c.stop_laps, vec![12, 34]);
        assert_eq!(c.stint_lengths, vec![12, 22, 23]);
    }

    #[test]
    fn indices_follow_generation_order() {
        let cands = generate(57, &default_tyre_life_bounds());
        assert!(cands.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn too_short_race_yields_nothing() {
        assert!(generate(10, &default_tyre_life_bounds()).is_empty());
    }
}
