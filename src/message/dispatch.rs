//! Controller-to-agent test dispatch.
//!
//! The whole test description travels as camelCase JSON in the `TestMessage`
//! binary attribute. Environment variables are secrets: they never appear in
//! `Debug` output or in [`TestDispatchMessage::sanitized`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::error::{AppError, AppResult, MessageError};
use crate::plan::TestPlanParser;
use crate::queue::{MessageAttributes, OutgoingMessage, QueueType, Queues, ReceivedMessage};
use crate::storage::key_filename;
use crate::test_id::TestIdentifier;

use super::{
    KnownAttribute, Receipt, TEST_MESSAGE_ATTRIBUTE, delete_received, extend_received,
    json_attribute, json_binary, log_unknown_attribute, receive_envelope,
};

pub const DEFAULT_BUCKET_SIZE_MS: u64 = 60_000;

const ENVELOPE: &str = "TestDispatchMessage";

/// Everything needed to build a [`TestDispatchMessage`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DispatchParams {
    pub test_id: String,
    pub storage_folder: String,
    pub yaml_file: String,
    pub additional_files: Option<Vec<String>>,
    pub test_run_time_minutes: Option<u32>,
    pub bucket_size_ms: Option<u64>,
    pub version: String,
    pub env_variables: BTreeMap<String, String>,
    pub user_id: Option<String>,
    pub restart_on_failure: bool,
    pub bypass_parser: Option<bool>,
}

impl fmt::Debug for DispatchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchParams")
            .field("test_id", &self.test_id)
            .field("storage_folder", &self.storage_folder)
            .field("yaml_file", &self.yaml_file)
            .field("additional_files", &self.additional_files)
            .field("test_run_time_minutes", &self.test_run_time_minutes)
            .field("bucket_size_ms", &self.bucket_size_ms)
            .field("version", &self.version)
            .field("env_variables", &Redacted(self.env_variables.len()))
            .field("user_id", &self.user_id)
            .field("restart_on_failure", &self.restart_on_failure)
            .field("bypass_parser", &self.bypass_parser)
            .finish()
    }
}

impl DispatchParams {
    /// Runs the plan through `parser` and fills the identity and timing
    /// fields of `base` from it. The plan sees `base.env_variables`.
    ///
    /// Every input file the plan declares must be among
    /// `base.additional_files` (compared by file name).
    ///
    /// # Errors
    ///
    /// Returns `PlanParse` when the parser rejects the plan or an input file
    /// was not supplied.
    pub fn from_plan<P>(
        parser: &P,
        test: &TestIdentifier,
        plan: &[u8],
        base: DispatchParams,
    ) -> AppResult<Self>
    where
        P: TestPlanParser + ?Sized,
    {
        let parsed = parser.parse(plan, &base.env_variables).map_err(|err| {
            AppError::message(MessageError::PlanParse {
                yaml_file: base.yaml_file.clone(),
                message: err.message,
            })
        })?;
        let supplied: Vec<&str> = base
            .additional_files
            .iter()
            .flatten()
            .map(|file| key_filename(file))
            .collect();
        if let Some(missing) = parsed
            .input_files
            .iter()
            .find(|input| !supplied.contains(&key_filename(input)))
        {
            return Err(AppError::message(MessageError::PlanParse {
                yaml_file: base.yaml_file,
                message: format!("input file {} was not provided", missing),
            }));
        }
        Ok(Self {
            test_id: test.test_id(),
            storage_folder: test.storage_folder(),
            test_run_time_minutes: Some(parsed.test_run_time_minutes),
            bucket_size_ms: Some(parsed.bucket_size_ms),
            ..base
        })
    }
}

struct Redacted(usize);

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} redacted>", self.0)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct TestDispatchMessage {
    test_id: String,
    storage_folder: String,
    yaml_file: String,
    additional_files: Option<Vec<String>>,
    test_run_time_minutes: Option<u32>,
    bucket_size_ms: u64,
    version: String,
    env_variables: BTreeMap<String, String>,
    user_id: Option<String>,
    restart_on_failure: bool,
    bypass_parser: Option<bool>,
    receipt: Option<Receipt>,
}

impl fmt::Debug for TestDispatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDispatchMessage")
            .field("test_id", &self.test_id)
            .field("storage_folder", &self.storage_folder)
            .field("yaml_file", &self.yaml_file)
            .field("additional_files", &self.additional_files)
            .field("test_run_time_minutes", &self.test_run_time_minutes)
            .field("bucket_size_ms", &self.bucket_size_ms)
            .field("version", &self.version)
            .field("env_variables", &Redacted(self.env_variables.len()))
            .field("user_id", &self.user_id)
            .field("restart_on_failure", &self.restart_on_failure)
            .field("bypass_parser", &self.bypass_parser)
            .field("receipt", &self.receipt)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchWire<'msg> {
    test_id: &'msg str,
    storage_folder: &'msg str,
    yaml_file: &'msg str,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_files: Option<&'msg [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_run_time_minutes: Option<u32>,
    bucket_size_ms: u64,
    version: &'msg str,
    env_variables: &'msg BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'msg str>,
    restart_on_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bypass_parser: Option<bool>,
}

impl TestDispatchMessage {
    /// # Errors
    ///
    /// Returns `EmptyTestId` when nothing survives sanitizing, or
    /// `MissingRunTime` when the run time is absent and the parser is not
    /// bypassed.
    pub fn new(params: DispatchParams) -> AppResult<Self> {
        let test_id = sanitize_test_id(&params.test_id)?;
        if params.test_run_time_minutes.is_none() && params.bypass_parser != Some(true) {
            return Err(AppError::message(MessageError::MissingRunTime { test_id }));
        }
        Ok(Self {
            test_id,
            storage_folder: params.storage_folder,
            yaml_file: params.yaml_file,
            additional_files: params.additional_files,
            test_run_time_minutes: params.test_run_time_minutes,
            bucket_size_ms: params.bucket_size_ms.unwrap_or(DEFAULT_BUCKET_SIZE_MS),
            version: params.version,
            env_variables: params.env_variables,
            user_id: params.user_id,
            restart_on_failure: params.restart_on_failure,
            bypass_parser: params.bypass_parser,
            receipt: None,
        })
    }

    #[must_use]
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    #[must_use]
    pub fn storage_folder(&self) -> &str {
        &self.storage_folder
    }

    #[must_use]
    pub fn yaml_file(&self) -> &str {
        &self.yaml_file
    }

    #[must_use]
    pub fn additional_files(&self) -> &[String] {
        self.additional_files.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub const fn test_run_time_minutes(&self) -> Option<u32> {
        self.test_run_time_minutes
    }

    #[must_use]
    pub const fn bucket_size_ms(&self) -> u64 {
        self.bucket_size_ms
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Secret values; do not log.
    #[must_use]
    pub const fn env_variables(&self) -> &BTreeMap<String, String> {
        &self.env_variables
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub const fn restart_on_failure(&self) -> bool {
        self.restart_on_failure
    }

    #[must_use]
    pub const fn bypass_parser(&self) -> Option<bool> {
        self.bypass_parser
    }

    #[must_use]
    pub const fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.receipt.as_ref().map(|receipt| receipt.message_id.as_str())
    }

    /// Display form with the environment variables left out.
    #[must_use]
    pub fn sanitized(&self) -> Value {
        json!({
            "testId": self.test_id,
            "storageFolder": self.storage_folder,
            "yamlFile": self.yaml_file,
            "additionalFiles": self.additional_files,
            "testRunTimeMinutes": self.test_run_time_minutes,
            "bucketSizeMs": self.bucket_size_ms,
            "version": self.version,
            "userId": self.user_id,
            "restartOnFailure": self.restart_on_failure,
            "bypassParser": self.bypass_parser,
            "messageId": self.message_id(),
        })
    }

    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_outgoing(&self) -> AppResult<OutgoingMessage> {
        let wire = DispatchWire {
            test_id: &self.test_id,
            storage_folder: &self.storage_folder,
            yaml_file: &self.yaml_file,
            additional_files: self.additional_files.as_deref(),
            test_run_time_minutes: self.test_run_time_minutes,
            bucket_size_ms: self.bucket_size_ms,
            version: &self.version,
            env_variables: &self.env_variables,
            user_id: self.user_id.as_deref(),
            restart_on_failure: self.restart_on_failure,
            bypass_parser: self.bypass_parser,
        };
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            TEST_MESSAGE_ATTRIBUTE.to_owned(),
            json_binary("test dispatch message", &wire)?,
        );
        Ok(OutgoingMessage {
            body: format!("Run test {}", self.test_id),
            attributes,
        })
    }

    /// # Errors
    ///
    /// Returns a decode error naming the first missing or mistyped field.
    pub fn decode(queue_url: String, message: &ReceivedMessage) -> AppResult<Self> {
        let mut payload = None;
        for (name, value) in &message.attributes {
            match KnownAttribute::parse(name) {
                Some(KnownAttribute::TestMessage) => {
                    payload = Some(json_attribute(ENVELOPE, TEST_MESSAGE_ATTRIBUTE, value)?);
                }
                Some(
                    KnownAttribute::TestId
                    | KnownAttribute::MessageType
                    | KnownAttribute::MessageData
                    | KnownAttribute::UnitTestMessage
                    | KnownAttribute::Scale,
                )
                | None => log_unknown_attribute(ENVELOPE, name),
            }
        }
        let payload = payload.ok_or_else(|| {
            AppError::message(MessageError::MissingAttribute {
                envelope: ENVELOPE,
                attribute: TEST_MESSAGE_ATTRIBUTE,
            })
        })?;
        let mut decoded = Self::from_json(&payload)?;
        decoded.receipt = Some(Receipt::from_received(queue_url, message));
        Ok(decoded)
    }

    /// Validates and converts the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns a decode error naming the first missing or mistyped field.
    pub fn from_json(payload: &Value) -> AppResult<Self> {
        let Some(object) = payload.as_object() else {
            return Err(field_type("(payload)", "a JSON object"));
        };
        let params = DispatchParams {
            test_id: required_str(object, "testId")?,
            storage_folder: required_str(object, "storageFolder")?,
            yaml_file: required_str(object, "yamlFile")?,
            version: required_str(object, "version")?,
            env_variables: env_variables(object)?,
            additional_files: optional_string_list(object, "additionalFiles")?,
            test_run_time_minutes: optional_u64(object, "testRunTimeMinutes")?
                .map(|minutes| {
                    u32::try_from(minutes)
                        .ok()
                        .ok_or_else(|| field_type("testRunTimeMinutes", "a 32-bit count"))
                })
                .transpose()?,
            bucket_size_ms: optional_u64(object, "bucketSizeMs")?,
            user_id: optional_str(object, "userId")?,
            restart_on_failure: optional_bool(object, "restartOnFailure")?.unwrap_or(false),
            bypass_parser: optional_bool(object, "bypassParser")?,
        };
        Self::new(params)
    }

    /// Sends to the test queue of `group` (optional when only one exists).
    ///
    /// # Errors
    ///
    /// Returns an error when the group is unknown or the send fails.
    pub async fn send(&self, queues: &Queues, group: Option<&str>) -> AppResult<String> {
        let message_id = queues
            .send(QueueType::Test, group, self.to_outgoing()?)
            .await?;
        info!("Dispatched {} as {}", self.test_id, message_id);
        Ok(message_id)
    }

    /// # Errors
    ///
    /// Returns an error when the receive fails or the payload is malformed;
    /// a malformed message stays on the queue.
    pub async fn receive(queues: &Queues, group: Option<&str>) -> AppResult<Option<Self>> {
        let Some((queue_url, message)) =
            receive_envelope(queues, QueueType::Test, group, None).await?
        else {
            return Ok(None);
        };
        Self::decode(queue_url, &message).map(Some)
    }

    /// # Errors
    ///
    /// Returns `NotReceived` for a message that was never received.
    pub async fn delete(&mut self, queues: &Queues) -> AppResult<()> {
        delete_received(queues, &mut self.receipt).await
    }

    /// # Errors
    ///
    /// Returns `NotReceived` for a message that was never received.
    pub async fn extend_visibility(&self, queues: &Queues, visibility_timeout_secs: i32) -> AppResult<()> {
        extend_received(queues, self.receipt.as_ref(), visibility_timeout_secs).await
    }
}

/// Keeps `[A-Za-z0-9_-]`.
fn sanitize_test_id(value: &str) -> AppResult<String> {
    let sanitized: String = value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect();
    if sanitized.is_empty() {
        return Err(AppError::message(MessageError::EmptyTestId {
            value: value.to_owned(),
        }));
    }
    Ok(sanitized)
}

fn missing_field(field: &'static str) -> AppError {
    AppError::message(MessageError::MissingField {
        envelope: ENVELOPE,
        field,
    })
}

fn field_type(field: &'static str, expected: &'static str) -> AppError {
    AppError::message(MessageError::FieldType {
        envelope: ENVELOPE,
        field,
        expected,
    })
}

fn present<'obj>(object: &'obj Map<String, Value>, field: &'static str) -> Option<&'obj Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn required_str(object: &Map<String, Value>, field: &'static str) -> AppResult<String> {
    match present(object, field) {
        None => Err(missing_field(field)),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(field_type(field, "a string")),
    }
}

fn optional_str(object: &Map<String, Value>, field: &'static str) -> AppResult<Option<String>> {
    match present(object, field) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(field_type(field, "a string")),
    }
}

fn optional_bool(object: &Map<String, Value>, field: &'static str) -> AppResult<Option<bool>> {
    match present(object, field) {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(field_type(field, "a boolean")),
    }
}

fn optional_u64(object: &Map<String, Value>, field: &'static str) -> AppResult<Option<u64>> {
    present(object, field).map_or(Ok(None), |value| {
        value
            .as_u64()
            .map(Some)
            .ok_or_else(|| field_type(field, "a non-negative integer"))
    })
}

fn optional_string_list(
    object: &Map<String, Value>,
    field: &'static str,
) -> AppResult<Option<Vec<String>>> {
    let Some(value) = present(object, field) else {
        return Ok(None);
    };
    let Value::Array(items) = value else {
        return Err(field_type(field, "an array of strings"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or_else(|| field_type(field, "an array of strings"))
        })
        .collect::<AppResult<Vec<String>>>()
        .map(Some)
}

/// Accepts `{"KEY": "value"}` or `[["KEY", "value"], ...]`.
fn env_variables(object: &Map<String, Value>) -> AppResult<BTreeMap<String, String>> {
    const FIELD: &str = "envVariables";
    const EXPECTED: &str = "a map of strings";
    match present(object, FIELD) {
        None => Err(missing_field(FIELD)),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, value)| {
                value
                    .as_str()
                    .map(|value| (key.clone(), value.to_owned()))
                    .ok_or_else(|| field_type(FIELD, EXPECTED))
            })
            .collect(),
        Some(Value::Array(pairs)) => pairs
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(key), Value::String(value)]) => Ok((key.clone(), value.clone())),
                _ => Err(field_type(FIELD, EXPECTED)),
            })
            .collect(),
        Some(_) => Err(field_type(FIELD, EXPECTED)),
    }
}
