//! Round-robin rotation primitives.
//!
//! This library decides which candidate should hold "active" status next.
//! Key concepts:
//!
//! - **Candidate set**: everyone currently eligible, read fresh each cycle.
//! - **Active marker**: who is active right now (absent before the first run).
//! - **Rotation order**: ascending ordering key, ties broken by ID.
//!
//! # Invariants
//!
//! - `rotate` is pure and deterministic given the same inputs
//! - The result is always a member of the candidate set
//! - Starting from no marker, `n` rotations visit all `n` candidates once
//! - A marker that names a vanished candidate behaves like no marker

mod candidate;
mod error;

pub use candidate::{ActiveMarker, BidTally, Candidate, CandidateDetails, CandidateId};
pub use error::{IdError, RotationError};

/// Return candidates in rotation order.
///
/// The order is total: ascending `ordering_key`, then ascending ID.
pub fn rotation_order(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    ordered
}

/// Choose the next active candidate.
///
/// With no `current`, or a `current` that is no longer in `candidates`, the
/// first candidate in rotation order is chosen. Otherwise the one right after
/// `current`, wrapping from the last back to the first.
pub fn rotate<'a>(
    candidates: &'a [Candidate],
    current: Option<&CandidateId>,
) -> Result<&'a Candidate, RotationError> {
    let ordered = rotation_order(candidates);
    let Some(first) = ordered.first().copied() else {
        return Err(RotationError::EmptyCandidateSet);
    };

    let position = current.and_then(|id| ordered.iter().position(|c| &c.id == id));

    Ok(match position {
        Some(idx) => ordered[(idx + 1) % ordered.len()],
        None => first,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn candidate(id: &str, key: i64) -> Candidate {
        Candidate::new(id.parse().unwrap(), id.to_uppercase(), key)
    }

    fn abc() -> Vec<Candidate> {
        vec![candidate("a", 1), candidate("b", 2), candidate("c", 3)]
    }

    fn id(raw: &str) -> CandidateId {
        raw.parse().unwrap()
    }

    #[test]
    fn test_empty_set_fails() {
        assert_eq!(rotate(&[], None), Err(RotationError::EmptyCandidateSet));
        assert_eq!(
            rotate(&[], Some(&id("a"))),
            Err(RotationError::EmptyCandidateSet)
        );
    }

    #[rstest]
    #[case::bootstrap(None, "a")]
    #[case::advance(Some("a"), "b")]
    #[case::middle(Some("b"), "c")]
    #[case::wrap_around(Some("c"), "a")]
    #[case::removed_externally(Some("zzz"), "a")]
    fn test_rotate_abc(#[case] current: Option<&str>, #[case] expected: &str) {
        let candidates = abc();
        let current = current.map(id);
        let next = rotate(&candidates, current.as_ref()).unwrap();
        assert_eq!(next.id, id(expected));
    }

    #[test]
    fn test_removed_current_restarts_from_first() {
        let candidates = vec![candidate("a", 1), candidate("c", 3)];
        let next = rotate(&candidates, Some(&id("b"))).unwrap();
        assert_eq!(next.id, id("a"));
    }

    #[test]
    fn test_input_order_is_irrelevant() {
        let shuffled = vec![candidate("c", 3), candidate("a", 1), candidate("b", 2)];
        assert_eq!(rotate(&shuffled, None).unwrap().id, id("a"));
        assert_eq!(rotate(&shuffled, Some(&id("a"))).unwrap().id, id("b"));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let candidates = vec![candidate("y", 5), candidate("x", 5), candidate("w", 9)];
        let order: Vec<_> = rotation_order(&candidates)
            .into_iter()
            .map(|c| c.id.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["x", "y", "w"]);

        assert_eq!(rotate(&candidates, Some(&id("x"))).unwrap().id, id("y"));
    }

    #[test]
    fn test_single_candidate_stays_active() {
        let candidates = vec![candidate("solo", 42)];
        assert_eq!(rotate(&candidates, None).unwrap().id, id("solo"));
        assert_eq!(
            rotate(&candidates, Some(&id("solo"))).unwrap().id,
            id("solo")
        );
    }

    fn arb_candidates() -> impl Strategy<Value = Vec<Candidate>> {
        // Unique IDs; keys drawn from a small range so ties are common.
        prop::collection::btree_map("[a-z]{1,6}", -5i64..5, 1..12).prop_map(|m| {
            m.into_iter()
                .map(|(id, key)| candidate(&id, key))
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn prop_result_is_member(candidates in arb_candidates(), pick in any::<prop::sample::Index>(), absent in any::<bool>()) {
            let current = if absent { None } else { Some(pick.get(&candidates).id.clone()) };
            let next = rotate(&candidates, current.as_ref()).unwrap();
            prop_assert!(candidates.iter().any(|c| c.id == next.id));
        }

        #[test]
        fn prop_visits_every_candidate_once_per_cycle(candidates in arb_candidates()) {
            let mut seen = std::collections::BTreeSet::new();
            let mut current: Option<CandidateId> = None;
            for _ in 0..candidates.len() {
                let next = rotate(&candidates, current.as_ref()).unwrap().id.clone();
                prop_assert!(seen.insert(next.clone()), "visited {} twice", next);
                current = Some(next);
            }
            prop_assert_eq!(seen.len(), candidates.len());

            // The next step starts the cycle over.
            let first = rotate(&candidates, None).unwrap();
            prop_assert_eq!(&rotate(&candidates, current.as_ref()).unwrap().id, &first.id);
        }

        #[test]
        fn prop_deterministic(candidates in arb_candidates(), pick in any::<prop::sample::Index>()) {
            let current = Some(pick.get(&candidates).id.clone());
            let a = rotate(&candidates, current.as_ref()).unwrap();
            let b = rotate(&candidates, current.as_ref()).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_unknown_current_equals_absent(candidates in arb_candidates()) {
            // Uppercase never collides with the lowercase generator.
            let ghost = id("GHOST");
            prop_assert_eq!(
                rotate(&candidates, Some(&ghost)).unwrap(),
                rotate(&candidates, None).unwrap()
            );
        }

        #[test]
        fn prop_order_independent(candidates in arb_candidates(), pick in any::<prop::sample::Index>()) {
            let current = Some(pick.get(&candidates).id.clone());
            let mut reversed = candidates.clone();
            reversed.reverse();
            prop_assert_eq!(
                &rotate(&candidates, current.as_ref()).unwrap().id,
                &rotate(&reversed, current.as_ref()).unwrap().id
            );
        }
    }
}
