use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestIdError {
    #[error("Test name derived from '{yaml_file}' is empty.")]
    EmptyName { yaml_file: String },
    #[error("Test name '{name}' is reserved.")]
    ReservedName { name: String },
    #[error("Invalid test timestamp '{value}'. Expected YYYYMMDDTHHMMSSmmm.")]
    InvalidTimestamp { value: String },
    #[error("Test timestamp year {year} is outside 0000-9999.")]
    YearOutOfRange { year: i32 },
    #[error("Invalid test id '{value}'.")]
    InvalidTestId { value: String },
    #[error("Invalid storage folder '{value}'.")]
    InvalidFolder { value: String },
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
