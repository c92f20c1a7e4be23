//! Shared concurrency checks run against every store backend.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinSet;

use crate::model::{Account, Recipient};
use crate::ramp;
use crate::store::traits::{AccountStore, RecipientPool};

const SENDS: usize = 30;
const USES: u64 = 50;

/// Concurrent `record_send` edits racing one daily reset must behave as if
/// applied one at a time: every send lands and the reset is never undone by
/// a stale write.
pub(crate) async fn sends_racing_a_reset(store: Arc<dyn AccountStore>) {
    // Final stage so no promotion muddies the counts.
    let mut acct = Account::new("busy@x.com", "pw");
    acct.stage = ramp::MAX_STAGE;
    acct.daily_limit = ramp::daily_limit(ramp::MAX_STAGE);
    store.add(acct).await.unwrap();

    // Edits run under the table lock, so push order is commit order.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();
    for i in 0..SENDS {
        let task_store = Arc::clone(&store);
        let seen = Arc::clone(&seen);
        tasks.spawn(async move {
            task_store
                .modify(
                    "busy@x.com",
                    Box::new(move |a: &mut Account| {
                        a.record_send(Utc::now());
                        seen.lock().unwrap().push(a.sent_today);
                    }),
                )
                .await
                .unwrap();
        });
        if i == SENDS / 2 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store.reset_daily_counts().await.unwrap();
            });
        }
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), SENDS);
    assert_eq!(seen[0], 1, "first send saw a stale count: {seen:?}");

    // At most one drop back to 1, where the reset slotted in.
    let restart = seen.iter().skip(1).position(|&n| n == 1).map(|p| p + 1);
    for (i, pair) in seen.windows(2).enumerate() {
        assert!(
            pair[1] == pair[0] + 1 || Some(i + 1) == restart,
            "lost or stale increment at {i}: {seen:?}"
        );
    }

    let sent_today = store
        .find("busy@x.com")
        .await
        .unwrap()
        .unwrap()
        .sent_today as usize;
    match restart {
        Some(at) => assert_eq!(sent_today, SENDS - at),
        // Reset ran before every send or after all of them.
        None => assert!(sent_today == SENDS || sent_today == 0, "got {sent_today}"),
    }
}

/// Concurrent `record_use` calls on one recipient must all be counted.
pub(crate) async fn uses_are_never_lost(pool: Arc<dyn RecipientPool>) {
    pool.add(Recipient::new("hot@y.com")).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..USES {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move { pool.record_use("hot@y.com").await.unwrap() });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let all = pool.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].use_count, USES);
    assert!(all[0].last_used_at.is_some());
}
