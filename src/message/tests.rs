use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use url::Url;

use super::dispatch::DEFAULT_BUCKET_SIZE_MS;
use super::*;
use crate::access::AccessHook;
use crate::config::{EnvResolver, FleetRole, MapEnv, NamingConfig};
use crate::plan::{ParsedTestPlan, TestPlanParseError, TestPlanParser};
use crate::queue::memory::MemoryQueueApi;
use crate::queue::{AttributeValue, MessageAttributes, OutgoingMessage, QueueApi, QueueTiming, QueueType};
use crate::storage::memory::MemoryObjectStore;
use crate::storage::{ObjectStorage, ObjectStoreApi, StorageLocation, TagSet};
use crate::test_id::{TestIdOptions, TestIdentifier};
use crate::test_support::run_async_test;

const BUCKET: &str = "fleet-bucket";
const COMMS_URL: &str = "https://queue.local/comms";
const TEST_URL: &str = "https://queue.local/test";
const SCALE_URL: &str = "https://queue.local/scale";

fn queues_with(api: &Arc<MemoryQueueApi>) -> Queues {
    let env = MapEnv::new()
        .with("FLEETAGENT_DEV_QUEUE_URL_COMMUNICATION", COMMS_URL)
        .with("FLEETAGENT_DEV_QUEUE_URL_TEST", TEST_URL)
        .with("FLEETAGENT_DEV_QUEUE_URL_SCALE", SCALE_URL);
    let api: Arc<dyn QueueApi> = api.clone();
    Queues::new(
        api,
        EnvResolver::new(Arc::new(env), &NamingConfig::default()),
        FleetRole::Agent,
        QueueTiming::default(),
        AccessHook::default(),
    )
}

fn storage_with(store: &Arc<MemoryObjectStore>) -> AppResult<ObjectStorage> {
    let api: Arc<dyn ObjectStoreApi> = store.clone();
    let bucket_url = Url::parse("https://fleet-bucket.s3.amazonaws.com")
        .map_err(|err| AppError::message(format!("bad url: {}", err)))?;
    Ok(ObjectStorage::new(
        api,
        EnvResolver::default(),
        TagSet::new(),
        AccessHook::default(),
    )
    .with_location(StorageLocation {
        bucket: BUCKET.to_owned(),
        bucket_url,
        keyspace_prefix: "unit/".to_owned(),
    }))
}

fn fixed_test(name: &str) -> AppResult<TestIdentifier> {
    let timestamp: DateTime<Utc> = Utc
        .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
        .single()
        .ok_or_else(|| AppError::message("fixed time out of range"))?;
    TestIdentifier::make(
        name,
        TestIdOptions {
            profile: None,
            timestamp: Some(timestamp),
        },
    )
}

fn dispatch_params() -> DispatchParams {
    DispatchParams {
        test_id: "basic20240506T070809000".to_owned(),
        storage_folder: "basic/20240506T070809000".to_owned(),
        yaml_file: "basic.yaml".to_owned(),
        additional_files: Some(vec!["users.csv".to_owned()]),
        test_run_time_minutes: Some(5),
        bucket_size_ms: None,
        version: "0.5.12".to_owned(),
        env_variables: BTreeMap::from([("PASSWORD".to_owned(), "hunter2".to_owned())]),
        user_id: Some("tester".to_owned()),
        restart_on_failure: false,
        bypass_parser: None,
    }
}

#[test]
fn message_type_rejects_unknown_values() -> AppResult<()> {
    if "TestFinished".parse::<MessageType>()? != MessageType::TestFinished {
        return Err(AppError::message("TestFinished did not parse"));
    }
    match "Pause".parse::<MessageType>() {
        Err(AppError::Message(MessageError::UnknownMessageType { value })) if value == "Pause" => {
            Ok(())
        }
        other => Err(AppError::message(format!("unexpected parse result {:?}", other))),
    }
}

#[test]
fn communications_message_round_trips_through_queue() -> AppResult<()> {
    run_async_test(async {
        let api = Arc::new(MemoryQueueApi::new());
        let queues = queues_with(&api);
        let sent = CommunicationsMessage::new(
            "basic20240506T070809000",
            MessageType::TestStatus,
            Some(json!({"status": "Running"})),
        );
        sent.send(&queues).await?;

        let Some(mut received) = CommunicationsMessage::receive(&queues).await? else {
            return Err(AppError::message("expected a communications message"));
        };
        if received.test_id != sent.test_id
            || received.message_type != sent.message_type
            || received.message_data != sent.message_data
        {
            return Err(AppError::message(format!("mismatch: {:?}", received)));
        }
        if received.receipt().is_none() {
            return Err(AppError::message("received message should carry a receipt"));
        }
        received.delete(&queues).await?;
        if api.message_count(COMMS_URL) != 0 {
            return Err(AppError::message("message should be deleted"));
        }
        match received.delete(&queues).await {
            Err(AppError::Message(MessageError::NotReceived { .. })) => Ok(()),
            other => Err(AppError::message(format!("expected NotReceived, got {:?}", other))),
        }
    })
}

#[test]
fn synthetic_messages_are_discarded_on_receive() -> AppResult<()> {
    run_async_test(async {
        let api = Arc::new(MemoryQueueApi::new());
        let queues = queues_with(&api);
        CommunicationsMessage::new("basic20240506T070809000", MessageType::StopTest, None)
            .mark_synthetic()
            .send(&queues)
            .await?;

        if CommunicationsMessage::receive(&queues).await?.is_some() {
            return Err(AppError::message("synthetic message should read as none"));
        }
        if api.message_count(COMMS_URL) != 0 {
            return Err(AppError::message("synthetic message should be deleted"));
        }
        Ok(())
    })
}

#[test]
fn communications_decode_requires_message_type() -> AppResult<()> {
    run_async_test(async {
        let api = Arc::new(MemoryQueueApi::new());
        let queues = queues_with(&api);
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            TEST_ID_ATTRIBUTE.to_owned(),
            AttributeValue::String("basic20240506T070809000".to_owned()),
        );
        attributes.insert(
            "Extra".to_owned(),
            AttributeValue::String("ignored".to_owned()),
        );
        queues
            .send(
                QueueType::Communications,
                None,
                OutgoingMessage {
                    body: "partial".to_owned(),
                    attributes,
                },
            )
            .await?;
        match CommunicationsMessage::receive(&queues).await {
            Err(AppError::Message(MessageError::MissingAttribute { attribute, .. }))
                if attribute == MESSAGE_TYPE_ATTRIBUTE =>
            {
                Ok(())
            }
            other => Err(AppError::message(format!("unexpected result {:?}", other))),
        }
    })
}

#[test]
fn dispatch_round_trips_and_keeps_secrets_out_of_debug() -> AppResult<()> {
    run_async_test(async {
        let api = Arc::new(MemoryQueueApi::new());
        let queues = queues_with(&api);
        let sent = TestDispatchMessage::new(dispatch_params())?;
        sent.send(&queues, None).await?;

        let Some(mut received) = TestDispatchMessage::receive(&queues, None).await? else {
            return Err(AppError::message("expected a dispatch message"));
        };
        if received.env_variables().get("PASSWORD").map(String::as_str) != Some("hunter2") {
            return Err(AppError::message("env variables were not delivered"));
        }
        if received.bucket_size_ms() != DEFAULT_BUCKET_SIZE_MS {
            return Err(AppError::message("bucket size should default"));
        }
        if received.additional_files() != ["users.csv"] {
            return Err(AppError::message("additional files were lost"));
        }
        let debug = format!("{:?}", received);
        let sanitized = received.sanitized().to_string();
        if debug.contains("hunter2") || sanitized.contains("hunter2") {
            return Err(AppError::message("secret leaked into display output"));
        }
        if received.message_id().is_none() {
            return Err(AppError::message("received dispatch should expose its id"));
        }
        received.delete(&queues).await?;
        if api.message_count(TEST_URL) != 0 {
            return Err(AppError::message("dispatch should be deleted"));
        }
        Ok(())
    })
}

#[test]
fn dispatch_requires_env_variables() -> AppResult<()> {
    let payload = json!({
        "testId": "basic20240506T070809000",
        "storageFolder": "basic/20240506T070809000",
        "yamlFile": "basic.yaml",
        "version": "0.5.12",
        "testRunTimeMinutes": 5,
    });
    match TestDispatchMessage::from_json(&payload) {
        Err(AppError::Message(MessageError::MissingField { field, .. })) if field == "envVariables" => {
            Ok(())
        }
        other => Err(AppError::message(format!("unexpected result {:?}", other))),
    }
}

#[test]
fn dispatch_accepts_env_variables_as_pairs() -> AppResult<()> {
    let payload = json!({
        "testId": "basic20240506T070809000",
        "storageFolder": "basic/20240506T070809000",
        "yamlFile": "basic.yaml",
        "version": "0.5.12",
        "testRunTimeMinutes": 5,
        "envVariables": [["HOST", "example.com"], ["PORT", "443"]],
    });
    let message = TestDispatchMessage::from_json(&payload)?;
    if message.env_variables().len() != 2
        || message.env_variables().get("PORT").map(String::as_str) != Some("443")
    {
        return Err(AppError::message(format!(
            "unexpected env variables {:?}",
            message.env_variables().keys().collect::<Vec<_>>()
        )));
    }

    let bad = json!({
        "testId": "basic20240506T070809000",
        "storageFolder": "basic/20240506T070809000",
        "yamlFile": "basic.yaml",
        "version": "0.5.12",
        "testRunTimeMinutes": 5,
        "envVariables": [["HOST"]],
    });
    match TestDispatchMessage::from_json(&bad) {
        Err(AppError::Message(MessageError::FieldType { .. })) => Ok(()),
        other => Err(AppError::message(format!("unexpected result {:?}", other))),
    }
}

#[test]
fn dispatch_requires_run_time_unless_bypassed() -> AppResult<()> {
    let mut params = dispatch_params();
    params.test_run_time_minutes = None;
    if !matches!(
        TestDispatchMessage::new(params.clone()),
        Err(AppError::Message(MessageError::MissingRunTime { .. }))
    ) {
        return Err(AppError::message("missing run time should be rejected"));
    }
    params.bypass_parser = Some(true);
    let message = TestDispatchMessage::new(params)?;
    if message.test_run_time_minutes().is_some() {
        return Err(AppError::message("run time should stay absent"));
    }
    Ok(())
}

#[test]
fn dispatch_sanitizes_test_id() -> AppResult<()> {
    let mut params = dispatch_params();
    params.test_id = "basic 2024/05.06!".to_owned();
    let message = TestDispatchMessage::new(params.clone())?;
    if message.test_id() != "basic20240506" {
        return Err(AppError::message(format!("unexpected id {}", message.test_id())));
    }
    params.test_id = "../..".to_owned();
    match TestDispatchMessage::new(params) {
        Err(AppError::Message(MessageError::EmptyTestId { .. })) => Ok(()),
        other => Err(AppError::message(format!("unexpected result {:?}", other))),
    }
}

struct FixedPlan {
    input_files: Vec<String>,
}

impl TestPlanParser for FixedPlan {
    fn parse(
        &self,
        plan: &[u8],
        variables: &BTreeMap<String, String>,
    ) -> Result<ParsedTestPlan, TestPlanParseError> {
        if plan.is_empty() {
            return Err(TestPlanParseError::new("empty plan"));
        }
        if !variables.contains_key("PASSWORD") {
            return Err(TestPlanParseError::new("PASSWORD is not defined"));
        }
        Ok(ParsedTestPlan {
            bucket_size_ms: 30_000,
            test_run_time_minutes: 15,
            input_files: self.input_files.clone(),
            logger_files: Vec::new(),
        })
    }
}

#[test]
fn dispatch_params_from_plan_fill_timing() -> AppResult<()> {
    let test = fixed_test("basic.yaml")?;
    let parser = FixedPlan {
        input_files: vec!["data/users.csv".to_owned()],
    };
    let params = DispatchParams::from_plan(&parser, &test, b"vars: {}", dispatch_params())?;
    if params.test_run_time_minutes != Some(15) || params.bucket_size_ms != Some(30_000) {
        return Err(AppError::message(format!("timing not filled: {:?}", params)));
    }
    if params.test_id != test.test_id() || params.storage_folder != test.storage_folder() {
        return Err(AppError::message("identity not taken from the test"));
    }

    let needs_more = FixedPlan {
        input_files: vec!["users.csv".to_owned(), "hosts.csv".to_owned()],
    };
    match DispatchParams::from_plan(&needs_more, &test, b"vars: {}", dispatch_params()) {
        Err(AppError::Message(MessageError::PlanParse { message, .. }))
            if message.contains("hosts.csv") =>
        {
            Ok(())
        }
        other => Err(AppError::message(format!("unexpected result {:?}", other))),
    }
}

#[test]
fn dispatch_params_surface_parser_errors() -> AppResult<()> {
    let test = fixed_test("basic.yaml")?;
    let parser = FixedPlan {
        input_files: Vec::new(),
    };
    match DispatchParams::from_plan(&parser, &test, b"", dispatch_params()) {
        Err(AppError::Message(MessageError::PlanParse { message, .. })) if message == "empty plan" => {
            Ok(())
        }
        other => Err(AppError::message(format!("unexpected result {:?}", other))),
    }
}

#[test]
fn control_message_send_get_delete() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let test = fixed_test("basic.yaml")?;

        if ControlMessage::get_message(&storage, &test).await?.is_some() {
            return Err(AppError::message("no control message expected yet"));
        }

        let mut sent = ControlMessage::new(
            test.clone(),
            MessageType::UpdateYaml,
            Some(json!({"yamlFile": "basic.yaml"})),
        );
        let url = sent.send(&storage).await?;
        if !url.ends_with("unit/basic/20240506T070809000/basic20240506T070809000.msg") {
            return Err(AppError::message(format!("unexpected url {}", url)));
        }

        let Some(mut received) = ControlMessage::get_message(&storage, &test).await? else {
            return Err(AppError::message("expected a control message"));
        };
        if received.message_type != MessageType::UpdateYaml
            || received.message_data != sent.message_data
            || !received.persisted()
        {
            return Err(AppError::message(format!("unexpected message {:?}", received)));
        }
        received.delete(&storage).await?;
        if received.persisted() || ControlMessage::get_message(&storage, &test).await?.is_some() {
            return Err(AppError::message("control message should be gone"));
        }
        Ok(())
    })
}

#[test]
fn empty_control_message_is_removed() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let test = fixed_test("basic.yaml")?;
        let key = format!("unit/{}", ControlMessage::key_for(&test));
        store.insert_raw(BUCKET, &key, Bytes::new(), None);

        if ControlMessage::get_message(&storage, &test).await?.is_some() {
            return Err(AppError::message("empty body should read as no message"));
        }
        if store.contains(BUCKET, &key) {
            return Err(AppError::message("empty body should be deleted"));
        }
        Ok(())
    })
}

#[test]
fn malformed_control_messages_read_as_none() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let test = fixed_test("basic.yaml")?;
        let key = format!("unit/{}", ControlMessage::key_for(&test));
        let bodies: [&'static [u8]; 3] = [
            b"{not json",
            b"{\"testId\":\"basic20240506T070809000\"}",
            b"{\"testId\":\"basic20240506T070809000\",\"messageType\":\"Pause\"}",
        ];
        for body in bodies {
            store.insert_raw(BUCKET, &key, Bytes::from_static(body), None);
            if ControlMessage::get_message(&storage, &test).await?.is_some() {
                return Err(AppError::message(format!(
                    "body {:?} should read as no message",
                    String::from_utf8_lossy(body)
                )));
            }
            if !store.contains(BUCKET, &key) {
                return Err(AppError::message("malformed body should be left in place"));
            }
        }
        Ok(())
    })
}

#[test]
fn status_values_outside_known_set_survive() -> AppResult<()> {
    let parsed: TestStatusData = serde_json::from_value(json!({
        "startTime": 1,
        "endTime": 2,
        "status": "Paused",
    }))
    .map_err(|err| AppError::message(format!("parse failed: {}", err)))?;
    if parsed.status != TestStatus::Other("Paused".to_owned()) {
        return Err(AppError::message(format!("unexpected status {:?}", parsed.status)));
    }
    let encoded = serde_json::to_value(&parsed)
        .map_err(|err| AppError::message(format!("encode failed: {}", err)))?;
    if encoded.get("status") != Some(&json!("Paused")) {
        return Err(AppError::message(format!("unexpected encoding {}", encoded)));
    }
    if TestStatus::from("Finished".to_owned()) != TestStatus::Finished || !TestStatus::Failed.is_terminal() {
        return Err(AppError::message("known statuses should map to variants"));
    }
    Ok(())
}

fn status_data(status: TestStatus) -> TestStatusData {
    TestStatusData {
        instance_id: Some("i-0123".to_owned()),
        hostname: Some("agent-1".to_owned()),
        start_time: 1_714_979_289_000,
        end_time: 1_714_980_189_000,
        results_filenames: vec!["stats-basic.json".to_owned()],
        status,
        ..TestStatusData::default()
    }
}

#[test]
fn status_read_only_refreshes_when_remote_changes() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let test = fixed_test("basic.yaml")?;

        if TestStatusRecord::get_status(&storage, &test).await?.is_some() {
            return Err(AppError::message("no status expected yet"));
        }

        let writer = TestStatusRecord::new(test.clone(), status_data(TestStatus::Running));
        writer.write(&storage).await?;

        let Some(mut reader) = TestStatusRecord::get_status(&storage, &test).await? else {
            return Err(AppError::message("expected a status record"));
        };
        if reader.data.status != TestStatus::Running {
            return Err(AppError::message(format!("unexpected status {}", reader.data.status)));
        }
        if reader.last_modified_remote() <= DateTime::UNIX_EPOCH {
            return Err(AppError::message("watermark should be set after a read"));
        }
        if reader.read(&storage).await? {
            return Err(AppError::message("unchanged record should not refresh"));
        }

        let mut writer = writer;
        writer.data.status = TestStatus::Finished;
        writer.write(&storage).await?;
        if !reader.read(&storage).await? || reader.data.status != TestStatus::Finished {
            return Err(AppError::message("changed record should refresh"));
        }
        Ok(())
    })
}

#[test]
fn get_all_status_skips_ignored_and_broken_records() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let first = fixed_test("first.yaml")?;
        let second = fixed_test("second.yaml")?;
        let ignored = fixed_test("ignored.yaml")?;
        let broken = fixed_test("broken.yaml")?;
        for test in [&first, &second, &ignored] {
            TestStatusRecord::new(test.clone(), status_data(TestStatus::Running))
                .write(&storage)
                .await?;
        }
        store.insert_raw(
            BUCKET,
            &format!("unit/{}", TestStatusRecord::key_for(&broken)),
            Bytes::from_static(b"not json"),
            None,
        );

        let records = TestStatusRecord::get_all_status(
            &storage,
            "",
            None,
            &[format!("{}/", ignored.storage_folder())],
        )
        .await?;
        let mut ids: Vec<String> = records.iter().map(|record| record.test.test_id()).collect();
        ids.sort();
        if ids != [first.test_id(), second.test_id()] {
            return Err(AppError::message(format!("unexpected records {:?}", ids)));
        }
        Ok(())
    })
}

#[test]
fn get_all_status_caps_after_dropping_ignored_folders() -> AppResult<()> {
    run_async_test(async {
        let store = Arc::new(MemoryObjectStore::new());
        let storage = storage_with(&store)?;
        let ignored = fixed_test("aaignored.yaml")?;
        let kept = fixed_test("bbkept.yaml")?;
        let later = fixed_test("cclater.yaml")?;
        for test in [&ignored, &kept, &later] {
            TestStatusRecord::new(test.clone(), status_data(TestStatus::Finished))
                .write(&storage)
                .await?;
        }

        let records = TestStatusRecord::get_all_status(
            &storage,
            "",
            Some(1),
            &[ignored.storage_folder()],
        )
        .await?;
        let ids: Vec<String> = records.iter().map(|record| record.test.test_id()).collect();
        if ids != [kept.test_id()] {
            return Err(AppError::message(format!("unexpected records {:?}", ids)));
        }
        Ok(())
    })
}
