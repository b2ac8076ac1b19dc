//! S3-backed [`ObjectStoreApi`].

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{Tag, Tagging, TaggingDirective};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::aws::{boxed_error, http_status, load_sdk_config};
use crate::config::AwsConfig;
use crate::error::{AppError, AppResult, StorageError};

use super::{
    GetOutcome, ListPage, ListRequest, ObjectStoreApi, ObjectSummary, PutRequest, StoredObject,
    TagSet,
};

const NOT_MODIFIED: u16 = 304;
const NOT_FOUND: u16 = 404;

/// Unreserved characters and `/` stay literal in `x-amz-copy-source`.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug)]
pub struct S3ObjectStore {
    aws: AwsConfig,
    client: OnceCell<Client>,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(aws: AwsConfig) -> Self {
        Self {
            aws,
            client: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            aws: AwsConfig::default(),
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let shared = load_sdk_config(&self.aws).await;
                let s3_config = aws_sdk_s3::config::Builder::from(&shared)
                    .force_path_style(self.aws.endpoint_url.is_some())
                    .build();
                Client::from_conf(s3_config)
            })
            .await
    }
}

fn service_error(
    operation: &'static str,
    key: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> AppError {
    AppError::storage(StorageError::Service {
        operation,
        key: key.to_owned(),
        source,
    })
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

fn not_found(key: &str) -> AppError {
    AppError::storage(StorageError::NotFound {
        key: key.to_owned(),
    })
}

fn to_chrono(key: &str, value: Option<&AwsDateTime>) -> AppResult<DateTime<Utc>> {
    value
        .and_then(|value| value.to_millis().ok())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| {
            AppError::storage(StorageError::MissingTimestamp {
                key: key.to_owned(),
            })
        })
}

fn to_sdk_tags(key: &str, tags: &TagSet) -> AppResult<Tagging> {
    let tag_set = tags
        .iter()
        .map(|(name, value)| {
            Tag::builder()
                .key(name)
                .value(value)
                .build()
                .map_err(|err| service_error("build tag", key, Box::new(err)))
        })
        .collect::<AppResult<Vec<Tag>>>()?;
    Tagging::builder()
        .set_tag_set(Some(tag_set))
        .build()
        .map_err(|err| service_error("build tagging", key, Box::new(err)))
}

#[async_trait]
impl ObjectStoreApi for S3ObjectStore {
    async fn list_objects(&self, bucket: &str, request: &ListRequest) -> AppResult<ListPage> {
        let output = self
            .client()
            .await
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&request.prefix)
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|err| service_error("list_objects_v2", &request.prefix, boxed_error(&err)))?;

        let mut objects = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            let Some(key) = object.key() else {
                continue;
            };
            objects.push(ObjectSummary {
                key: key.to_owned(),
                last_modified: to_chrono(key, object.last_modified())?,
                size: object
                    .size()
                    .and_then(|size| u64::try_from(size).ok())
                    .unwrap_or(0),
            });
        }
        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_owned)
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_continuation_token,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> AppResult<GetOutcome> {
        let result = self
            .client()
            .await
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_if_modified_since(
                if_modified_since.map(|since| AwsDateTime::from_millis(since.timestamp_millis())),
            )
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                return match http_status(&err) {
                    Some(NOT_MODIFIED) => Ok(GetOutcome::NotModified),
                    Some(NOT_FOUND) => Err(not_found(key)),
                    _ if err
                        .as_service_error()
                        .is_some_and(|service| service.is_no_such_key()) =>
                    {
                        Err(not_found(key))
                    }
                    _ => Err(service_error("get_object", key, boxed_error(&err))),
                };
            }
        };

        let last_modified = to_chrono(key, output.last_modified())?;
        let content_encoding = output.content_encoding().map(str::to_owned);
        let content_type = output.content_type().map(str::to_owned);
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| service_error("read body", key, Box::new(err)))?
            .into_bytes();
        debug!("Fetched {} ({} bytes)", key, body.len());
        Ok(GetOutcome::Found(StoredObject {
            body,
            last_modified,
            content_encoding,
            content_type,
        }))
    }

    async fn put_object(&self, bucket: &str, request: PutRequest) -> AppResult<()> {
        let key = request.key;
        self.client()
            .await
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(request.body))
            .content_type(request.content_type)
            .set_content_encoding(request.content_encoding)
            .set_tagging(request.tagging)
            .send()
            .await
            .map_err(|err| service_error("put_object", &key, boxed_error(&err)))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
        tagging: Option<String>,
    ) -> AppResult<()> {
        let directive = if tagging.is_some() {
            TaggingDirective::Replace
        } else {
            TaggingDirective::Copy
        };
        self.client()
            .await
            .copy_object()
            .bucket(bucket)
            .key(destination_key)
            .copy_source(copy_source(bucket, source_key))
            .tagging_directive(directive)
            .set_tagging(tagging)
            .send()
            .await
            .map_err(|err| {
                if http_status(&err) == Some(NOT_FOUND) {
                    not_found(source_key)
                } else {
                    service_error("copy_object", destination_key, boxed_error(&err))
                }
            })?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> AppResult<()> {
        self.client()
            .await
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| service_error("delete_object", key, boxed_error(&err)))?;
        Ok(())
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> AppResult<TagSet> {
        let output = self
            .client()
            .await
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if http_status(&err) == Some(NOT_FOUND) {
                    not_found(key)
                } else {
                    service_error("get_object_tagging", key, boxed_error(&err))
                }
            })?;
        Ok(output
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_owned(), tag.value().to_owned()))
            .collect())
    }

    async fn put_tags(&self, bucket: &str, key: &str, tags: &TagSet) -> AppResult<()> {
        let tagging = to_sdk_tags(key, tags)?;
        self.client()
            .await
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|err| {
                if http_status(&err) == Some(NOT_FOUND) {
                    not_found(key)
                } else {
                    service_error("put_object_tagging", key, boxed_error(&err))
                }
            })?;
        Ok(())
    }
}
