use super::memory::MemoryObjectStore;
use super::*;
use crate::config::{MapEnv, NamingConfig};
use crate::test_support::run_async_test;
use chrono::Duration as ChronoDuration;

const BUCKET: &str = "fleet-bucket";

fn location(prefix: &str) -> AppResult<StorageLocation> {
    Ok(StorageLocation {
        bucket: BUCKET.to_owned(),
        bucket_url: Url::parse("https://fleet-bucket.s3.amazonaws.com")
            .map_err(|err| AppError::storage(format!("bad url: {}", err)))?,
        keyspace_prefix: prefix.to_owned(),
    })
}

fn storage_with(store: &Arc<MemoryObjectStore>, prefix: &str) -> AppResult<ObjectStorage> {
    let api: Arc<dyn ObjectStoreApi> = store.clone();
    Ok(ObjectStorage::new(
        api,
        EnvResolver::default(),
        TagSet::new().with("team", "perf"),
        AccessHook::default(),
    )
    .with_location(location(prefix)?))
}

#[test]
fn location_reads_environment() -> AppResult<()> {
    let env = MapEnv::new()
        .with("FLEETAGENT_DEV_BUCKET_NAME", "my-bucket")
        .with("FLEETAGENT_DEV_KEYSPACE_PREFIX", "/shared/");
    let resolver = EnvResolver::new(Arc::new(env), &NamingConfig::default());
    let location = StorageLocation::from_env(&resolver)?;
    if location.keyspace_prefix != "shared/" {
        return Err(AppError::storage(format!(
            "unexpected prefix {}",
            location.keyspace_prefix
        )));
    }
    let url = location.remote_url("plan/20240101T000000000/plan.yaml");
    if url != "https://my-bucket.s3.amazonaws.com/shared/plan/20240101T000000000/plan.yaml" {
        return Err(AppError::storage(format!("unexpected url {}", url)));
    }

    let empty = EnvResolver::new(Arc::new(MapEnv::new()), &NamingConfig::default());
    match StorageLocation::from_env(&empty) {
        Err(AppError::Config(ConfigError::MissingEnv { .. })) => Ok(()),
        Err(err) => Err(err),
        Ok(_) => Err(AppError::storage("missing bucket should fail")),
    }
}

#[test]
fn writes_are_gzipped_and_reads_decoded() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "unit/")?;
        storage
            .upload_file_contents(
                "plan/ts/stats-1.json",
                Bytes::from_static(b"{\"ok\":true}"),
                None,
                &default_test_file_tags(),
            )
            .await?;

        let raw = store
            .raw_body(BUCKET, "unit/plan/ts/stats-1.json")
            .ok_or_else(|| AppError::storage("object stored without key prefix"))?;
        if raw.as_ref() == b"{\"ok\":true}" {
            return Err(AppError::storage("body was not compressed"));
        }

        let GetOutcome::Found(object) = storage.get_object("plan/ts/stats-1.json", None).await?
        else {
            return Err(AppError::storage("expected a body"));
        };
        if object.body.as_ref() != b"{\"ok\":true}" {
            return Err(AppError::storage("body was not decoded"));
        }
        if object.content_type.as_deref() != Some("application/json") {
            return Err(AppError::storage("content type not inferred"));
        }
        let tags = storage.get_tags("plan/ts/stats-1.json").await?;
        if tags.get(TEST_TAG_KEY) != Some("true") || tags.get("team") != Some("perf") {
            return Err(AppError::storage(format!("unexpected tags {:?}", tags)));
        }
        Ok(())
    })
}

#[test]
fn conditional_get_distinguishes_not_modified_from_not_found() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        store.insert_raw(BUCKET, "a/b/c.txt", "hello", None);
        let written = store
            .last_modified(BUCKET, "a/b/c.txt")
            .ok_or_else(|| AppError::storage("object should exist"))?;

        if storage.get_object("a/b/c.txt", Some(written)).await? != GetOutcome::NotModified {
            return Err(AppError::storage("expected NotModified at the watermark"));
        }
        let older = written
            .checked_sub_signed(ChronoDuration::seconds(1))
            .ok_or_else(|| AppError::storage("timestamp out of range"))?;
        match storage.get_object("a/b/c.txt", Some(older)).await? {
            GetOutcome::Found(object) if object.last_modified == written => {}
            other @ (GetOutcome::Found(_) | GetOutcome::NotModified) => {
                return Err(AppError::storage(format!("expected body, got {:?}", other)));
            }
        }
        match storage.get_object("a/b/missing.txt", None).await {
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
            Ok(outcome) => Err(AppError::storage(format!("expected NotFound, got {:?}", outcome))),
        }
    })
}

#[test]
fn contents_are_truncated_not_rejected() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        store.insert_raw(BUCKET, "f/notes.txt", "héllo world", None);

        let contents = storage
            .get_file_contents("f/notes.txt", None, Some(2))
            .await?
            .ok_or_else(|| AppError::storage("expected contents"))?;
        // 'é' spans bytes 1..3, so the cut backs off to a char boundary.
        if contents.contents != "h" {
            return Err(AppError::storage(format!("unexpected {}", contents.contents)));
        }
        let full = storage
            .get_file_contents("f/notes.txt", None, None)
            .await?
            .ok_or_else(|| AppError::storage("expected contents"))?;
        if full.contents != "héllo world" {
            return Err(AppError::storage(format!("unexpected {}", full.contents)));
        }
        Ok(())
    })
}

#[test]
fn list_all_paginates_filters_and_caps() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "ks/")?;
        for index in 0..1_205 {
            store.insert_raw(BUCKET, &format!("ks/run/ts/stats-{:04}.json", index), "{}", None);
        }
        store.insert_raw(BUCKET, "ks/run/ts/run.yaml", "", None);
        store.insert_raw(BUCKET, "ks/other/ts/stats-0.json", "{}", None);

        let all = storage.list_files("run/ts", Some(".json"), None).await?;
        if all.len() != 1_205 {
            return Err(AppError::storage(format!("listed {} files", all.len())));
        }
        if all.iter().any(|object| object.key.starts_with("ks/")) {
            return Err(AppError::storage("keys should be relative to the key space"));
        }
        if store.counts().lists != 2 {
            return Err(AppError::storage("expected two pages"));
        }

        let capped = storage.list_all("run/", None, Some(10)).await?;
        if capped.len() != 10 {
            return Err(AppError::storage(format!("cap ignored: {}", capped.len())));
        }
        let none = storage.list_files("nothing-here", None, None).await?;
        if !none.is_empty() {
            return Err(AppError::storage("empty listing should be empty"));
        }
        Ok(())
    })
}

#[test]
fn zero_cap_lists_nothing() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        store.insert_raw(BUCKET, "f/a.json", "{}", None);
        store.insert_raw(BUCKET, "f/b.json", "{}", None);

        let listed = storage.list_all("f/", None, Some(0)).await?;
        if !listed.is_empty() {
            return Err(AppError::storage(format!("zero cap listed {}", listed.len())));
        }
        if store.counts().lists != 0 {
            return Err(AppError::storage("zero cap should not reach the service"));
        }
        let one = storage.list_all("f/", Some("json"), Some(1)).await?;
        if one.len() != 1 {
            return Err(AppError::storage(format!("cap of one listed {}", one.len())));
        }
        Ok(())
    })
}

#[test]
fn copy_to_self_makes_no_calls() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        match storage.copy_file("a/b/file.csv", "a/b/file.csv", None).await {
            Err(AppError::Storage(StorageError::CopyToSelf { folder, filename })) => {
                if folder != "a/b" || filename != "file.csv" {
                    return Err(AppError::storage("copy-to-self error names wrong file"));
                }
            }
            Err(err) => return Err(err),
            Ok(()) => return Err(AppError::storage("copy to self should fail")),
        }
        if store.counts().total() != 0 {
            return Err(AppError::storage("copy to self reached the service"));
        }
        Ok(())
    })
}

#[test]
fn copy_inherits_or_replaces_tags() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        storage
            .upload_file_contents(
                "src/file.csv",
                Bytes::from_static(b"a,b"),
                None,
                &TagSet::new().with("origin", "src"),
            )
            .await?;

        storage.copy_file("src/file.csv", "dst/inherit.csv", None).await?;
        let inherited = storage.get_tags("dst/inherit.csv").await?;
        if inherited.get("origin") != Some("src") {
            return Err(AppError::storage("copy without tags should inherit"));
        }

        storage
            .copy_file(
                "src/file.csv",
                "dst/replace.csv",
                Some(&TagSet::new().with("origin", "dst")),
            )
            .await?;
        let replaced = storage.get_tags("dst/replace.csv").await?;
        if replaced.get("origin") != Some("dst") || replaced.get("team") != Some("perf") {
            return Err(AppError::storage(format!("unexpected tags {:?}", replaced)));
        }
        Ok(())
    })
}

#[test]
fn update_tags_only_writes_on_change() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store, "")?;
        store.insert_raw(BUCKET, "f/file.txt", "x", None);
        storage
            .put_tags("f/file.txt", &TagSet::new().with(TEST_TAG_KEY, "false"))
            .await?;

        if !storage.update_tags("f/file.txt", &default_test_file_tags()).await? {
            return Err(AppError::storage("missing default tag should be added"));
        }
        let tags = storage.get_tags("f/file.txt").await?;
        if tags.get(TEST_TAG_KEY) != Some("false") || tags.get("team") != Some("perf") {
            return Err(AppError::storage(format!("defaults overwrote tags: {:?}", tags)));
        }

        let writes_before = store.counts().tag_writes;
        if storage.update_tags("f/file.txt", &default_test_file_tags()).await? {
            return Err(AppError::storage("unchanged tags should not be written"));
        }
        if store.counts().tag_writes != writes_before {
            return Err(AppError::storage("unchanged tags were written"));
        }
        Ok(())
    })
}

#[test]
fn content_type_follows_extension() -> AppResult<()> {
    let cases = [
        ("a/b/plan.YAML", "text/x-yaml"),
        ("a/b/id.msg", "application/json"),
        ("a/b/data.csv", "text/csv"),
        ("a/b/binary", "application/octet-stream"),
    ];
    for (key, expected) in cases {
        if content_type_for(key) != expected {
            return Err(AppError::storage(format!("{} mapped to {}", key, content_type_for(key))));
        }
    }
    Ok(())
}
