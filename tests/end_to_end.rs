// CLASSIFICATION: COMMUNITY
// Filename: end_to_end.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

mod common;

use quotaswap::codec::credential::{ACCESS_SECRET_FIELD, CREDENTIAL_FIELD, REFRESH_SECRET_FIELD};
use quotaswap::codec::{find_field, remove_field, RecordIter};
use quotaswap::quota::{normalize, RawQuotaResponse};
use quotaswap::switch::{BlobStore, TickOutcome};

use common::{claude_policy, Pool, BASE_BLOB};

#[test]
fn raw_fraction_normalizes_to_percent() {
    let raw: RawQuotaResponse = serde_json::from_str(
        r#"{"models": {"claude-x": {"quotaInfo": {"remainingFraction": 0.08}}}}"#,
    )
    .unwrap();
    let snapshot = normalize(&raw, 0);
    assert_eq!(snapshot.resources.len(), 1);
    assert_eq!(snapshot.resources[0].name, "claude");
    assert_eq!(snapshot.resources[0].remaining_percent, 8);
}

#[test]
fn low_quota_swaps_credential_field_in_blob() {
    let pool = Pool::new("e2e");
    assert!(pool.lease.try_become_leader().unwrap());
    pool.add("active", 0.08);
    pool.add("spare", 0.90);
    pool.install("active");
    let before = pool.blobs.read().unwrap().unwrap();

    let mut decision = pool.decision(claude_policy(10));
    assert!(matches!(
        decision.tick(),
        TickOutcome::Switched { to_id, .. } if to_id == "spare"
    ));

    let after = pool.blobs.read().unwrap().unwrap();
    // Everything but the credential field survives byte for byte.
    assert_eq!(
        remove_field(&after, CREDENTIAL_FIELD),
        remove_field(&before, CREDENTIAL_FIELD)
    );
    assert_eq!(remove_field(&after, CREDENTIAL_FIELD), BASE_BLOB);

    let credential_fields = RecordIter::new(&after)
        .filter_map(Result::ok)
        .filter(|r| r.tag().field == CREDENTIAL_FIELD)
        .count();
    assert_eq!(credential_fields, 1);

    let payload = find_field(&after, CREDENTIAL_FIELD).unwrap();
    assert_eq!(find_field(payload, ACCESS_SECRET_FIELD).unwrap(), b"acc-spare");
    assert_eq!(find_field(payload, REFRESH_SECRET_FIELD).unwrap(), b"1//spare");
}
