//! Deterministic commit log for the demo.

use crate::projection::{ACCOUNT_STREAM_PREFIX, AccountEvent};
use commitflow_core::commit::CommittedEvent;
use commitflow_testing::InMemoryEventStore;
use std::collections::BTreeMap;

/// Every this many commits a heartbeat commit (not an account stream) is written.
const HEARTBEAT_EVERY: usize = 10;

/// Fill `store` with `commits` commits spread over `accounts` accounts.
///
/// Returns the balance each account should end up with.
pub fn seed_commits(
    store: &InMemoryEventStore,
    accounts: usize,
    commits: usize,
) -> BTreeMap<String, i64> {
    let mut expected = BTreeMap::new();

    for n in 1..=commits {
        if n % HEARTBEAT_EVERY == 0 {
            store.append(
                "system-heartbeat",
                vec![CommittedEvent::new("Heartbeat", serde_json::json!({ "n": n }))],
            );
            continue;
        }

        let account = format!("{ACCOUNT_STREAM_PREFIX}{}", n % accounts.max(1));
        let amount_cents = i64::try_from(n).unwrap_or(i64::MAX).saturating_mul(100);
        let event = if n % 3 == 0 {
            AccountEvent::Withdrawn { amount_cents: amount_cents / 2 }
        } else {
            AccountEvent::Deposited { amount_cents }
        };

        *expected.entry(account.clone()).or_insert(0) += event.delta_cents();
        store.append(account, vec![event.to_committed()]);
    }

    expected
}
