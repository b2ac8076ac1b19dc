use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("{envelope} is missing required attribute {attribute}.")]
    MissingAttribute {
        envelope: &'static str,
        attribute: &'static str,
    },
    #[error("{envelope} attribute {attribute} must be a {expected} value.")]
    AttributeKind {
        envelope: &'static str,
        attribute: &'static str,
        expected: &'static str,
    },
    #[error("{envelope} attribute {attribute} is not valid UTF-8: {source}")]
    AttributeUtf8 {
        envelope: &'static str,
        attribute: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("{envelope} is missing required field {field}.")]
    MissingField {
        envelope: &'static str,
        field: &'static str,
    },
    #[error("{envelope} field {field} must be {expected}.")]
    FieldType {
        envelope: &'static str,
        field: &'static str,
        expected: &'static str,
    },
    #[error("Unknown message type '{value}'.")]
    UnknownMessageType { value: String },
    #[error("Test {test_id} needs testRunTimeMinutes unless the parser is bypassed.")]
    MissingRunTime { test_id: String },
    #[error("Test id '{value}' is empty after sanitizing.")]
    EmptyTestId { value: String },
    #[error("Cannot {operation} a message that was not received from the queue.")]
    NotReceived { operation: &'static str },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Test plan for {yaml_file} failed to parse: {message}")]
    PlanParse { yaml_file: String, message: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
