//! Property: however a batch of offline writes is replayed, including
//! rejections and retries, every record ends up with exactly one remote copy
//! and every foreign key sent points at a remote id.

use fieldsync_client::{
    db, ConnectivityMonitor, Course, FieldSync, Hazard, InMemoryRemote, RemoteError, SyncContext,
};
use fieldsync_engine::{RemoteId, SyncStatus};
use proptest::prelude::*;
use std::collections::HashSet;

fn run_batch(hazards_per_course: Vec<usize>, rejected: usize) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    runtime.block_on(async move {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        let remote = InMemoryRemote::new_shared();
        let monitor = ConnectivityMonitor::new(false);
        let sync = FieldSync::open(pool, remote.clone(), monitor.clone())
            .await
            .unwrap();
        let ctx = SyncContext::new();

        let mut total = 0;
        for (n, hazards) in hazards_per_course.iter().enumerate() {
            let course = sync
                .courses()
                .create(&ctx, &Course { name: format!("Course {}", n) })
                .await
                .unwrap();
            total += 1;
            for hole in 0..*hazards {
                sync.hazards()
                    .create(
                        &ctx,
                        &Hazard {
                            course_id: course.local_id.as_str().into(),
                            hole_number: hole as i64 + 1,
                            lat: 53.9,
                            lng: -0.7,
                            kind: None,
                        },
                    )
                    .await
                    .unwrap();
                total += 1;
            }
        }

        for _ in 0..rejected {
            remote.fail_next(RemoteError::Rejected("try again".into()));
        }
        monitor.set_online(true);
        sync.reconciler().run_pass(&ctx).await.unwrap();

        // Manual retries until everything lands.
        for _ in 0..total + 1 {
            if sync.local().summary().await.queued() == 0 {
                break;
            }
            sync.local().requeue_failed().await.unwrap();
            sync.reconciler().run_pass(&ctx).await.unwrap();
        }

        let summary = sync.local().summary().await;
        prop_assert_eq!(summary.synced, total);
        prop_assert_eq!(remote.len(), total);

        let courses: HashSet<RemoteId> = remote
            .records("courses")
            .into_iter()
            .map(|r| r.remote_id)
            .collect();
        for hazard in remote.records("hazards") {
            let course_id = hazard.fields["courseId"].as_str().unwrap_or_default();
            prop_assert!(courses.contains(&RemoteId::from(course_id)));
        }

        let records = sync
            .hazards()
            .list(&fieldsync_engine::Filter::new())
            .await
            .unwrap();
        for record in records {
            prop_assert_eq!(record.sync, SyncStatus::Synced);
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn replay_never_duplicates(
        hazards_per_course in prop::collection::vec(0usize..4, 1..5),
        rejected in 0usize..4,
    ) {
        run_batch(hazards_per_course, rejected)?;
    }
}
