//! Public download endpoint with `Range` support.
//!
//! Bodies are streamed from the blob backend in bounded steps; nothing is
//! buffered beyond one step.

use crate::{
    errors::AppError,
    handlers::auth::CurrentUser,
    services::harbor_service::{Download, HarborService},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};

/// Total object size, sent alongside partial bodies.
pub const OBJ_SIZE_HEADER: HeaderName = HeaderName::from_static("x-harbor-obj-size");

/// `attachment` disposition with an RFC 5987 encoded file name.
pub fn content_disposition(filename: &str) -> HeaderValue {
    let value = format!(
        "attachment;filename*=utf-8''{}",
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn download_response(download: Download) -> Response {
    let status = if download.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let length = download.content_length();

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&download.object.name),
    );
    headers.insert(OBJ_SIZE_HEADER, HeaderValue::from(download.total));
    if let Some(range) = download.range {
        if let Ok(value) = HeaderValue::from_str(&range.content_range(download.total)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }

    *response.body_mut() = Body::from_stream(download.body);
    response
}

/// GET `/obs/{bucket}/{*path}`: public, owner or shared download.
pub async fn download_object(
    State(service): State<HarborService>,
    CurrentUser(user): CurrentUser,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let range = headers
        .get(header::RANGE)
        .map(|v| {
            v.to_str()
                .map_err(|_| AppError::new(StatusCode::RANGE_NOT_SATISFIABLE, "invalid Range header"))
        })
        .transpose()?;

    let download = service
        .download(user.as_ref(), &bucket, &path, range)
        .await?;
    tracing::debug!(
        "serving {} from bucket {} ({} bytes)",
        download.object.path_name,
        bucket,
        download.content_length()
    );
    Ok(download_response(download))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::object::HarborObject, services::range::ByteRange};
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};

    fn download(range: Option<ByteRange>) -> Download {
        Download {
            object: HarborObject::new_file(0, "docs/report 1.pdf".into(), "report 1.pdf"),
            range,
            total: 100,
            body: stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed(),
        }
    }

    #[test]
    fn disposition_escapes_names() {
        assert_eq!(
            content_disposition("report 1.pdf"),
            "attachment;filename*=utf-8''report%201.pdf"
        );
        assert_eq!(
            content_disposition("отчёт.txt").to_str().unwrap(),
            "attachment;filename*=utf-8''%D0%BE%D1%82%D1%87%D1%91%D1%82.txt"
        );
    }

    #[test]
    fn full_download_headers() {
        let response = download_response(download(None));
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_LENGTH], "100");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[OBJ_SIZE_HEADER], "100");
        assert!(headers.get(header::CONTENT_RANGE).is_none());
    }

    #[test]
    fn partial_download_headers() {
        let response = download_response(download(Some(ByteRange { start: 10, end: 19 })));
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 10-19/100");
    }
}
