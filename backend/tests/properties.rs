//! Property invariants over the pure scoring and governance math.

use palisade_backend::fusion::{band, base_risk, clamp_risk};
use palisade_backend::governance::evaluate_transition;
use palisade_backend::ml::MlVerdict;
use palisade_backend::oracle::risk_label;
use palisade_backend::schema::{normalize_address, ConfirmedScam, ProposalStatus, TxStatus};
use palisade_backend::store::scam_record_dominates;
use proptest::prelude::*;

fn arb_verdict() -> impl Strategy<Value = MlVerdict> {
    prop_oneof![
        Just(MlVerdict::Fraud),
        Just(MlVerdict::Suspicious),
        Just(MlVerdict::Safe),
    ]
}

fn scam(block_number: Option<i64>, confirmed_secs: i64) -> ConfirmedScam {
    use chrono::TimeZone;
    ConfirmedScam {
        address: "0xaa".into(),
        scam_score: 50,
        proposal_id: 1,
        confirmed_at: chrono::Utc.timestamp_opt(confirmed_secs, 0).unwrap(),
        total_voters: 3,
        description: String::new(),
        tx_hash: None,
        block_number,
    }
}

proptest! {
    /// Stored addresses are always the lowercase form, and normalization
    /// is idempotent.
    #[test]
    fn address_normalization_is_lowercase_and_idempotent(raw in "0x[0-9a-fA-F]{40}") {
        let normalized = normalize_address(&raw);
        prop_assert_eq!(normalized.clone(), raw.to_lowercase());
        prop_assert_eq!(normalize_address(&normalized), normalized);
    }

    /// A proposal passes iff quorum is met and the integer-truncated
    /// "for" percentage reaches the threshold.
    #[test]
    fn threshold_correctness(votes_for in 0i64..60, votes_against in 0i64..60) {
        let outcome = evaluate_transition(votes_for, votes_against, 3, 60);
        let total = votes_for + votes_against;

        let passes = total > 0 && total >= 3 && votes_for * 100 >= 60 * total;
        prop_assert_eq!(outcome == Some(ProposalStatus::Passed), passes);

        if total > 0 && total >= 3 && !passes {
            let rejects = votes_against * 100 / total > 40;
            prop_assert_eq!(outcome == Some(ProposalStatus::Rejected), rejects);
        }
        if total < 3 {
            prop_assert_eq!(outcome, None);
        }
    }

    /// An exact tie never passes.
    #[test]
    fn ties_never_pass(votes in 2i64..50) {
        prop_assert_ne!(
            evaluate_transition(votes, votes, 3, 60),
            Some(ProposalStatus::Passed)
        );
    }

    /// Fused risk stays in [0, 1] for any verdict and boost, and the
    /// status is determined solely by the configured thresholds.
    #[test]
    fn risk_bounds_and_banding(
        verdict in arb_verdict(),
        boost in 0.0f64..0.5,
        extra in 0.0f64..0.5,
        high_value in any::<bool>(),
    ) {
        let risk = clamp_risk(base_risk(verdict) + boost + extra);
        prop_assert!((0.0..=1.0).contains(&risk));

        let status = band(risk, high_value);
        let (blocked_above, suspicious_above) = if high_value { (0.5, 0.2) } else { (0.7, 0.3) };
        match status {
            TxStatus::Blocked => prop_assert!(risk > blocked_above),
            TxStatus::Suspicious => {
                prop_assert!(risk > suspicious_above && risk <= blocked_above)
            }
            TxStatus::Safe => prop_assert!(risk <= suspicious_above),
        }
    }

    /// Every score maps to one of the four labels, respecting the bands.
    #[test]
    fn oracle_label_mapping(score in 0u64..=100) {
        let label = risk_label(score);
        prop_assert!(["CRITICAL", "HIGH", "UNDER REVIEW", "CLEAN"].contains(&label));
        match score {
            75..=100 => prop_assert_eq!(label, "CRITICAL"),
            50..=74 => prop_assert_eq!(label, "HIGH"),
            20..=49 => prop_assert_eq!(label, "UNDER REVIEW"),
            _ => prop_assert_eq!(label, "CLEAN"),
        }
    }

    /// Chain-sourced projection rows never lose to local mirrors, and
    /// block numbers never regress.
    #[test]
    fn projection_dominance(
        new_block in prop::option::of(0i64..10_000),
        old_block in prop::option::of(0i64..10_000),
        new_time in 0i64..10_000,
        old_time in 0i64..10_000,
    ) {
        let incoming = scam(new_block, new_time);
        let stored = scam(old_block, old_time);
        let dominates = scam_record_dominates(&incoming, &stored);

        match (new_block, old_block) {
            (Some(n), Some(o)) => prop_assert_eq!(dominates, n >= o),
            (Some(_), None) => prop_assert!(dominates),
            (None, Some(_)) => prop_assert!(!dominates),
            (None, None) => prop_assert_eq!(dominates, new_time >= old_time),
        }
    }
}
