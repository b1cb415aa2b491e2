use std::time::Duration;

use rusty_s3::actions::{CreateMultipartUpload, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};

use idlevault_types::error::{IdlevaultError, Result};

use crate::http_util::{classify_http_error, extract_etag, read_body};
use crate::ObjectStore;

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// S3 (or S3-compatible) object store using presigned requests.
pub struct S3Store {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
    label: String,
}

impl S3Store {
    /// `endpoint` defaults to the regional AWS endpoint with virtual-host
    /// addressing; an explicit endpoint uses path-style addressing.
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        let (endpoint, url_style) = match endpoint {
            Some(ep) => (ep.to_string(), UrlStyle::Path),
            None => (
                format!("https://s3.{region}.amazonaws.com"),
                UrlStyle::VirtualHost,
            ),
        };
        let base_url = endpoint.parse().map_err(|e| {
            IdlevaultError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}"))
        })?;

        let bucket = Bucket::new(
            base_url,
            url_style,
            bucket_name.to_string(),
            region.to_string(),
        )
        .map_err(|e| IdlevaultError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let credentials = Credentials::new(access_key_id, secret_access_key);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(Self {
            bucket,
            credentials,
            agent,
            label: format!("s3://{bucket_name}"),
        })
    }
}

impl ObjectStore for S3Store {
    fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        self.agent
            .put(url.as_str())
            .send_bytes(data)
            .map_err(|e| classify_http_error(&format!("S3 PUT {key}"), e))?;
        Ok(())
    }

    fn create_multipart(&self, key: &str) -> Result<String> {
        let context = format!("S3 CREATE-MULTIPART {key}");
        let url = self
            .bucket
            .create_multipart_upload(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        let resp = self
            .agent
            .post(url.as_str())
            .call()
            .map_err(|e| classify_http_error(&context, e))?;
        let body = read_body(resp, &context)?;
        let parsed = CreateMultipartUpload::parse_response(&body).map_err(|e| {
            IdlevaultError::Storage(format!("{context}: failed to parse response: {e}"))
        })?;
        Ok(parsed.upload_id().to_string())
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u16,
        data: &[u8],
    ) -> Result<String> {
        let context = format!("S3 UPLOAD-PART {key} #{part_number}");
        let url = self
            .bucket
            .upload_part(Some(&self.credentials), key, part_number, upload_id)
            .sign(PRESIGN_DURATION);

        let resp = self
            .agent
            .put(url.as_str())
            .send_bytes(data)
            .map_err(|e| classify_http_error(&context, e))?;
        extract_etag(&resp, &context)
    }

    fn complete_multipart(&self, key: &str, upload_id: &str, etags: &[String]) -> Result<()> {
        let context = format!("S3 COMPLETE-MULTIPART {key}");
        let action = self.bucket.complete_multipart_upload(
            Some(&self.credentials),
            key,
            upload_id,
            etags.iter().map(String::as_str),
        );
        let url = action.sign(PRESIGN_DURATION);
        let body = action.body();

        let resp = self
            .agent
            .post(url.as_str())
            .send_string(&body)
            .map_err(|e| classify_http_error(&context, e))?;

        // S3 can report a failed completion inside a 200 response.
        let body = read_body(resp, &context)?;
        let text = String::from_utf8_lossy(&body);
        if text.contains("<Error>") {
            return Err(IdlevaultError::Transient(format!(
                "{context}: service reported an error after accepting the request"
            )));
        }
        Ok(())
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let url = self
            .bucket
            .abort_multipart_upload(Some(&self.credentials), key, upload_id)
            .sign(PRESIGN_DURATION);

        self.agent
            .delete(url.as_str())
            .call()
            .map_err(|e| classify_http_error(&format!("S3 ABORT-MULTIPART {key}"), e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_builds() {
        let store = S3Store::new("backups", "ap-south-1", None, "AKIA", "secret").unwrap();
        assert_eq!(store.describe(), "s3://backups");
    }

    #[test]
    fn custom_endpoint_builds() {
        assert!(S3Store::new(
            "backups",
            "us-east-1",
            Some("http://127.0.0.1:9000"),
            "minio",
            "minio123"
        )
        .is_ok());
    }

    #[test]
    fn bad_endpoint_is_config_error() {
        let err = S3Store::new("backups", "us-east-1", Some("not a url"), "a", "b")
            .err()
            .unwrap();
        assert!(matches!(err, IdlevaultError::Config(_)));
    }
}
