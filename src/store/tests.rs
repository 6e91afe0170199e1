#[cfg(test)]
mod tests {
    use crate::error::CoordinatorError;
    use crate::store::files::{content_hash, ArtifactRole, ArtifactStore};
    use std::path::PathBuf;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("crowd-store-{}", uuid::Uuid::new_v4().simple()))
    }

    async fn store_with_job(job_id: &str) -> ArtifactStore {
        let store = ArtifactStore::new(temp_root()).unwrap();
        store.register_job(job_id).await.unwrap();
        store
    }

    // ============================================================
    // PUT / GET ROUND-TRIP
    // ============================================================

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = store_with_job("job-1").await;

        let meta = store
            .put("job-1", "wordlist.txt", ArtifactRole::Input, b"alpha\nbravo\n")
            .await
            .unwrap();

        assert_eq!(meta.size, 12);
        assert_eq!(meta.sha256, content_hash(b"alpha\nbravo\n"));

        let (bytes, sha256) = store.get("job-1", "wordlist.txt").await.unwrap();
        assert_eq!(bytes, b"alpha\nbravo\n");
        assert_eq!(sha256, meta.sha256);
    }

    #[tokio::test]
    async fn test_put_empty_artifact() {
        let store = store_with_job("job-1").await;

        store
            .put("job-1", "shard-0003", ArtifactRole::Shard, b"")
            .await
            .unwrap();

        let (bytes, _) = store.get("job-1", "shard-0003").await.unwrap();
        assert!(bytes.is_empty());
    }

    // ============================================================
    // ERROR CASES
    // ============================================================

    #[tokio::test]
    async fn test_put_twice_is_conflict() {
        let store = store_with_job("job-1").await;

        store
            .put("job-1", "result.txt", ArtifactRole::TaskOutput, b"one")
            .await
            .unwrap();

        let err = store
            .put("job-1", "result.txt", ArtifactRole::TaskOutput, b"two")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));

        // The first write is untouched.
        let (bytes, _) = store.get("job-1", "result.txt").await.unwrap();
        assert_eq!(bytes, b"one");
    }

    #[tokio::test]
    async fn test_put_unknown_job() {
        let store = ArtifactStore::new(temp_root()).unwrap();

        let err = store
            .put("ghost", "a.txt", ArtifactRole::Input, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::JobUnknown(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store_with_job("job-1").await;

        let err = store.get("job-1", "nope.txt").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));

        let err = store.get("ghost", "nope.txt").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_traversal_names() {
        let store = store_with_job("job-1").await;

        for name in ["../escape", ".tmp-x", "", "a/b"] {
            let err = store
                .put("job-1", name, ArtifactRole::Input, b"x")
                .await
                .unwrap_err();
            assert!(matches!(err, CoordinatorError::BadRequest(_)), "{:?}", name);
        }
    }

    // ============================================================
    // LISTING AND ROLES
    // ============================================================

    #[tokio::test]
    async fn test_list_is_creation_ordered() {
        let store = store_with_job("job-1").await;

        for name in ["zeta.txt", "alpha.txt", "mid.txt"] {
            store
                .put("job-1", name, ArtifactRole::Input, b"x")
                .await
                .unwrap();
        }

        assert_eq!(
            store.list("job-1").unwrap(),
            vec!["zeta.txt", "alpha.txt", "mid.txt"]
        );
    }

    #[tokio::test]
    async fn test_mark_final_changes_role() {
        let store = store_with_job("job-1").await;

        store
            .put("job-1", "final.txt", ArtifactRole::TaskOutput, b"done")
            .await
            .unwrap();
        store.mark_final("job-1", "final.txt").unwrap();

        let meta = store.meta("job-1", "final.txt").unwrap();
        assert_eq!(meta.role, ArtifactRole::FinalOutput);
    }

    // ============================================================
    // DROP
    // ============================================================

    #[tokio::test]
    async fn test_drop_job_removes_everything() {
        let store = store_with_job("job-1").await;

        store
            .put("job-1", "a.txt", ArtifactRole::Input, b"a")
            .await
            .unwrap();

        store.drop_job("job-1").await.unwrap();

        assert!(!store.is_finalized("job-1", "a.txt"));
        assert!(store.list("job-1").is_err());

        // Idempotent.
        store.drop_job("job-1").await.unwrap();
    }
}
