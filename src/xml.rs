//! S3 XML documents.
//!
//! Responses are rendered with the `quick-xml` event writer; request bodies
//! (CompleteMultipartUpload, Delete) are read with its pull parser.  The
//! console's storage client decodes listing responses through `quick-xml`'s
//! serde support, see [`ListAllMyBucketsResult`] and [`ListBucketResult`].

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Deserialize;
use std::io::Cursor;

use crate::engine::{
    BucketInfo, CompletedPart, ListObjectsPage, ListObjectsParams, ListPartsPage, UploadInfo,
};
use crate::errors::S3Error;

const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Format a timestamp the way S3 listings do (`2026-02-22T12:00:00.000Z`).
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ── Error response ──────────────────────────────────────────────────

/// Render an S3 `<Error>` XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Error>
///   <Code>NoSuchBucket</Code>
///   <Message>The specified bucket does not exist</Message>
///   <Resource>/mybucket</Resource>
///   <RequestId>4442587FB7D0A2F9</RequestId>
/// </Error>
/// ```
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut writer = document();
    write_simple_element_group(
        &mut writer,
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );
    finish(writer)
}

// ── Bucket listings ─────────────────────────────────────────────────

/// Render `<ListAllMyBucketsResult>` for `GET /`.
pub fn render_list_buckets_result(owner: &str, buckets: &[BucketInfo]) -> String {
    let mut writer = document();
    start_root(&mut writer, "ListAllMyBucketsResult");

    write_simple_element_group(&mut writer, "Owner", &[("ID", owner), ("DisplayName", owner)]);

    start(&mut writer, "Buckets");
    for bucket in buckets {
        let created = iso8601(bucket.created);
        write_simple_element_group(
            &mut writer,
            "Bucket",
            &[("Name", &bucket.name), ("CreationDate", &created)],
        );
    }
    end(&mut writer, "Buckets");

    end(&mut writer, "ListAllMyBucketsResult");
    finish(writer)
}

/// Render `<ListBucketResult>` for ListObjects (v1).
pub fn render_list_objects_result(
    bucket: &str,
    params: &ListObjectsParams,
    page: &ListObjectsPage,
) -> String {
    let mut writer = document();
    start_root(&mut writer, "ListBucketResult");

    write_text_element(&mut writer, "Name", bucket);
    write_text_element(&mut writer, "Prefix", &params.prefix);
    write_text_element(&mut writer, "Marker", &params.marker);
    if let Some(next) = &page.next_marker {
        write_text_element(&mut writer, "NextMarker", next);
    }
    write_text_element(&mut writer, "MaxKeys", &params.max_keys.to_string());
    if !params.delimiter.is_empty() {
        write_text_element(&mut writer, "Delimiter", &params.delimiter);
    }
    write_text_element(&mut writer, "IsTruncated", bool_str(page.is_truncated));

    for object in &page.objects {
        let last_modified = iso8601(object.last_modified);
        let etag = quoted(&object.etag);
        let size = object.size.to_string();
        write_simple_element_group(
            &mut writer,
            "Contents",
            &[
                ("Key", &object.key),
                ("LastModified", &last_modified),
                ("ETag", &etag),
                ("Size", &size),
                ("StorageClass", "STANDARD"),
            ],
        );
    }

    for prefix in &page.common_prefixes {
        write_simple_element_group(&mut writer, "CommonPrefixes", &[("Prefix", prefix)]);
    }

    end(&mut writer, "ListBucketResult");
    finish(writer)
}

/// Render `<LocationConstraint>` for `GET /{bucket}?location`.
///
/// `us-east-1` is reported as an empty constraint, as S3 does.
pub fn render_location_constraint(region: &str) -> String {
    let mut writer = document();
    start_root(&mut writer, "LocationConstraint");
    if region != "us-east-1" {
        writer
            .write_event(Event::Text(BytesText::new(region)))
            .expect("text");
    }
    end(&mut writer, "LocationConstraint");
    finish(writer)
}

// ── Object results ──────────────────────────────────────────────────

/// A per-key failure inside a `<DeleteResult>`.
#[derive(Debug, Clone)]
pub struct DeleteFailure {
    pub key: String,
    pub code: &'static str,
    pub message: String,
}

/// Render `<DeleteResult>` for DeleteMultipleObjects.  Quiet mode only
/// reports failures.
pub fn render_delete_result(deleted: &[String], failures: &[DeleteFailure], quiet: bool) -> String {
    let mut writer = document();
    start_root(&mut writer, "DeleteResult");

    if !quiet {
        for key in deleted {
            write_simple_element_group(&mut writer, "Deleted", &[("Key", key)]);
        }
    }
    for failure in failures {
        write_simple_element_group(
            &mut writer,
            "Error",
            &[
                ("Key", &failure.key),
                ("Code", failure.code),
                ("Message", &failure.message),
            ],
        );
    }

    end(&mut writer, "DeleteResult");
    finish(writer)
}

/// Render `<CopyObjectResult>`.
pub fn render_copy_object_result(etag: &str, last_modified: DateTime<Utc>) -> String {
    let mut writer = document();
    let etag = quoted(etag);
    let last_modified = iso8601(last_modified);
    write_simple_element_group(
        &mut writer,
        "CopyObjectResult",
        &[("LastModified", &last_modified), ("ETag", &etag)],
    );
    finish(writer)
}

// ── Multipart ───────────────────────────────────────────────────────

/// Render `<InitiateMultipartUploadResult>`.
pub fn render_initiate_multipart_upload_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut writer = document();
    start_root(&mut writer, "InitiateMultipartUploadResult");
    write_text_element(&mut writer, "Bucket", bucket);
    write_text_element(&mut writer, "Key", key);
    write_text_element(&mut writer, "UploadId", upload_id);
    end(&mut writer, "InitiateMultipartUploadResult");
    finish(writer)
}

/// Render `<CompleteMultipartUploadResult>`.
pub fn render_complete_multipart_upload_result(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    let mut writer = document();
    start_root(&mut writer, "CompleteMultipartUploadResult");
    write_text_element(&mut writer, "Location", location);
    write_text_element(&mut writer, "Bucket", bucket);
    write_text_element(&mut writer, "Key", key);
    write_text_element(&mut writer, "ETag", &quoted(etag));
    end(&mut writer, "CompleteMultipartUploadResult");
    finish(writer)
}

/// Render `<ListMultipartUploadsResult>`.
pub fn render_list_multipart_uploads_result(
    bucket: &str,
    prefix: &str,
    max_uploads: usize,
    uploads: &[UploadInfo],
) -> String {
    let mut writer = document();
    start_root(&mut writer, "ListMultipartUploadsResult");

    write_text_element(&mut writer, "Bucket", bucket);
    write_text_element(&mut writer, "Prefix", prefix);
    write_text_element(&mut writer, "MaxUploads", &max_uploads.to_string());
    write_text_element(
        &mut writer,
        "IsTruncated",
        bool_str(uploads.len() >= max_uploads && max_uploads > 0),
    );

    for upload in uploads {
        let initiated = iso8601(upload.initiated);
        write_simple_element_group(
            &mut writer,
            "Upload",
            &[
                ("Key", &upload.key),
                ("UploadId", &upload.upload_id),
                ("StorageClass", "STANDARD"),
                ("Initiated", &initiated),
            ],
        );
    }

    end(&mut writer, "ListMultipartUploadsResult");
    finish(writer)
}

/// Render `<ListPartsResult>`.
pub fn render_list_parts_result(
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number_marker: u32,
    max_parts: usize,
    page: &ListPartsPage,
) -> String {
    let mut writer = document();
    start_root(&mut writer, "ListPartsResult");

    write_text_element(&mut writer, "Bucket", bucket);
    write_text_element(&mut writer, "Key", key);
    write_text_element(&mut writer, "UploadId", upload_id);
    write_text_element(&mut writer, "PartNumberMarker", &part_number_marker.to_string());
    if let Some(next) = page.next_part_number_marker {
        write_text_element(&mut writer, "NextPartNumberMarker", &next.to_string());
    }
    write_text_element(&mut writer, "MaxParts", &max_parts.to_string());
    write_text_element(&mut writer, "IsTruncated", bool_str(page.is_truncated));

    for part in &page.parts {
        let number = part.part_number.to_string();
        let last_modified = iso8601(part.last_modified);
        let etag = quoted(&part.etag);
        let size = part.size.to_string();
        write_simple_element_group(
            &mut writer,
            "Part",
            &[
                ("PartNumber", &number),
                ("LastModified", &last_modified),
                ("ETag", &etag),
                ("Size", &size),
            ],
        );
    }

    end(&mut writer, "ListPartsResult");
    finish(writer)
}

// ── Request bodies ──────────────────────────────────────────────────

/// Parse a `<CompleteMultipartUpload>` body into its part list.
pub fn parse_complete_multipart_upload(body: &[u8]) -> Result<Vec<CompletedPart>, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut parts = Vec::new();
    let mut part_number: Option<u32> = None;
    let mut etag: Option<String> = None;
    let mut in_part = false;
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "Part" {
                    in_part = true;
                    part_number = None;
                    etag = None;
                } else if in_part {
                    current_tag = tag;
                }
            }
            Ok(Event::Text(ref e)) if in_part => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?;
                match current_tag.as_str() {
                    "PartNumber" => part_number = text.trim().parse().ok(),
                    "ETag" => etag = Some(text.to_string()),
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Part" {
                    in_part = false;
                    match (part_number.take(), etag.take()) {
                        (Some(part_number), Some(etag)) => {
                            parts.push(CompletedPart { part_number, etag })
                        }
                        _ => return Err(S3Error::MalformedXML),
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(parts)
}

/// Parse a `<Delete>` body.  Returns the keys and the quiet flag.
pub fn parse_delete(body: &[u8]) -> Result<(Vec<String>, bool), S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut keys = Vec::new();
    let mut quiet = false;
    let mut saw_root = false;
    let mut in_object = false;
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match current_tag.as_str() {
                    "Delete" => saw_root = true,
                    "Object" => in_object = true,
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Object" {
                    in_object = false;
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?;
                if in_object && current_tag == "Key" {
                    keys.push(text.to_string());
                } else if current_tag == "Quiet" {
                    quiet = text.trim() == "true";
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root || keys.is_empty() || keys.len() > 1000 {
        return Err(S3Error::MalformedXML);
    }
    Ok((keys, quiet))
}

// ── Client-side documents ───────────────────────────────────────────

/// `GET /` response as seen by a storage client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListAllMyBucketsResult {
    #[serde(default)]
    pub buckets: BucketList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketList {
    #[serde(default)]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketEntry {
    pub name: String,
    pub creation_date: String,
}

/// `GET /{bucket}` response as seen by a storage client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    pub name: String,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_marker: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentsEntry>,
    #[serde(default)]
    pub common_prefixes: Vec<PrefixEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentsEntry {
    pub key: String,
    pub last_modified: String,
    pub size: u64,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrefixEntry {
    pub prefix: String,
}

/// `<Error>` response as seen by a storage client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorDocument {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ── Helpers ─────────────────────────────────────────────────────────

/// New writer with the XML declaration already emitted.
fn document() -> XmlWriter {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    writer
}

fn finish(writer: XmlWriter) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Open a root element carrying the S3 namespace.
fn start_root(writer: &mut XmlWriter, tag: &str) {
    let root = BytesStart::new(tag).with_attributes([("xmlns", S3_NAMESPACE)]);
    writer.write_event(Event::Start(root)).expect("start root");
}

fn start(writer: &mut XmlWriter, tag: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
}

fn end(writer: &mut XmlWriter, tag: &str) {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut XmlWriter, tag: &str, text: &str) {
    start(writer, tag);
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    end(writer, tag);
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(writer: &mut XmlWriter, parent: &str, children: &[(&str, &str)]) {
    start(writer, parent);
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    end(writer, parent);
}

fn quoted(etag: &str) -> String {
    format!("\"{}\"", etag.trim_matches('"'))
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
