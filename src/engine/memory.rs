//! In-memory storage engine.
//!
//! Buckets, objects and in-progress multipart uploads live in ordered maps
//! behind a single `RwLock`.  Nothing is persisted; the engine exists so the
//! gateway can run standalone and so the dispatch layer can be tested end
//! to end.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    BucketInfo, CompletedPart, EngineError, EngineResult, ListObjectsPage, ListObjectsParams,
    ListPartsPage, ObjectAttributes, ObjectInfo, PartInfo, PutObjectInput, StorageEngine,
    UploadInfo,
};

#[derive(Debug)]
struct StoredBucket {
    info: BucketInfo,
    policy: Option<Bytes>,
    objects: BTreeMap<String, (ObjectInfo, Bytes)>,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    info: UploadInfo,
    content_type: String,
    parts: BTreeMap<u32, (PartInfo, Bytes)>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<String, StoredBucket>,
    uploads: BTreeMap<String, Upload>,
}

/// Volatile [`StorageEngine`] backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: RwLock<Inner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hex MD5 of `data`.
fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Multipart ETag: MD5 over the concatenated binary part digests, suffixed
/// with the part count.
fn multipart_etag(part_etags: &[&str]) -> String {
    let mut hasher = Md5::new();
    for etag in part_etags {
        if let Ok(raw) = hex::decode(etag) {
            hasher.update(raw);
        }
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_etags.len())
}

fn bucket<'a>(inner: &'a Inner, name: &str) -> EngineResult<&'a StoredBucket> {
    inner
        .buckets
        .get(name)
        .ok_or_else(|| EngineError::BucketNotFound(name.to_string()))
}

fn bucket_mut<'a>(inner: &'a mut Inner, name: &str) -> EngineResult<&'a mut StoredBucket> {
    inner
        .buckets
        .get_mut(name)
        .ok_or_else(|| EngineError::BucketNotFound(name.to_string()))
}

fn upload<'a>(inner: &'a Inner, bucket: &str, key: &str, upload_id: &str) -> EngineResult<&'a Upload> {
    inner
        .uploads
        .get(upload_id)
        .filter(|u| u.bucket == bucket && u.info.key == key)
        .ok_or_else(|| EngineError::UploadNotFound(upload_id.to_string()))
}

impl StorageEngine for MemoryEngine {
    fn list_buckets(&self) -> EngineResult<Vec<BucketInfo>> {
        Ok(self.read().buckets.values().map(|b| b.info.clone()).collect())
    }

    fn make_bucket(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.write();
        if inner.buckets.contains_key(name) {
            return Err(EngineError::BucketExists(name.to_string()));
        }
        inner.buckets.insert(
            name.to_string(),
            StoredBucket {
                info: BucketInfo {
                    name: name.to_string(),
                    created: Utc::now(),
                },
                policy: None,
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn head_bucket(&self, name: &str) -> EngineResult<BucketInfo> {
        Ok(bucket(&self.read(), name)?.info.clone())
    }

    fn delete_bucket(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.write();
        if !bucket(&inner, name)?.objects.is_empty() {
            return Err(EngineError::BucketNotEmpty(name.to_string()));
        }
        inner.buckets.remove(name);
        inner.uploads.retain(|_, u| u.bucket != name);
        Ok(())
    }

    fn get_bucket_policy(&self, name: &str) -> EngineResult<Bytes> {
        bucket(&self.read(), name)?
            .policy
            .clone()
            .ok_or_else(|| EngineError::PolicyNotFound(name.to_string()))
    }

    fn put_bucket_policy(&self, name: &str, policy: Bytes) -> EngineResult<()> {
        bucket_mut(&mut self.write(), name)?.policy = Some(policy);
        Ok(())
    }

    fn delete_bucket_policy(&self, name: &str) -> EngineResult<()> {
        bucket_mut(&mut self.write(), name)?
            .policy
            .take()
            .map(|_| ())
            .ok_or_else(|| EngineError::PolicyNotFound(name.to_string()))
    }

    fn list_objects(&self, name: &str, params: &ListObjectsParams) -> EngineResult<ListObjectsPage> {
        let inner = self.read();
        let stored = bucket(&inner, name)?;

        let mut page = ListObjectsPage::default();
        let mut prefixes = BTreeSet::new();
        let mut last_key = None;

        let candidates = stored
            .objects
            .iter()
            .filter(|(key, _)| key.as_str() > params.marker.as_str())
            .filter(|(key, _)| key.starts_with(&params.prefix));

        for (key, (info, _)) in candidates {
            let rest = &key[params.prefix.len()..];
            let common = (!params.delimiter.is_empty())
                .then(|| rest.find(&params.delimiter))
                .flatten()
                .map(|pos| format!("{}{}", params.prefix, &rest[..pos + params.delimiter.len()]));

            // A prefix already rolled up does not count against max-keys again.
            if let Some(cp) = &common {
                if prefixes.contains(cp) {
                    continue;
                }
            }
            if page.objects.len() + prefixes.len() >= params.max_keys {
                page.is_truncated = true;
                break;
            }
            match common {
                Some(cp) => {
                    last_key = Some(cp.clone());
                    prefixes.insert(cp);
                }
                None => {
                    last_key = Some(key.clone());
                    page.objects.push(info.clone());
                }
            }
        }

        page.common_prefixes = prefixes.into_iter().collect();
        if page.is_truncated {
            page.next_marker = last_key;
        }
        Ok(page)
    }

    fn put_object(&self, name: &str, key: &str, input: PutObjectInput) -> EngineResult<ObjectInfo> {
        let mut inner = self.write();
        let stored = bucket_mut(&mut inner, name)?;
        let info = ObjectInfo {
            bucket: name.to_string(),
            key: key.to_string(),
            size: input.data.len() as u64,
            etag: md5_hex(&input.data),
            content_type: input.content_type,
            last_modified: Utc::now(),
            metadata: input.metadata,
        };
        stored
            .objects
            .insert(key.to_string(), (info.clone(), input.data));
        Ok(info)
    }

    fn get_object(&self, name: &str, key: &str) -> EngineResult<(ObjectInfo, Bytes)> {
        bucket(&self.read(), name)?
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::ObjectNotFound {
                bucket: name.to_string(),
                key: key.to_string(),
            })
    }

    fn head_object(&self, name: &str, key: &str) -> EngineResult<ObjectInfo> {
        self.get_object(name, key).map(|(info, _)| info)
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace: Option<ObjectAttributes>,
    ) -> EngineResult<ObjectInfo> {
        let (src, data) = self.get_object(src_bucket, src_key)?;
        let attributes = replace.unwrap_or(ObjectAttributes {
            content_type: src.content_type,
            metadata: src.metadata,
        });
        self.put_object(
            dst_bucket,
            dst_key,
            PutObjectInput {
                data,
                content_type: attributes.content_type,
                metadata: attributes.metadata,
            },
        )
    }

    fn delete_object(&self, name: &str, key: &str) -> EngineResult<()> {
        bucket_mut(&mut self.write(), name)?.objects.remove(key);
        Ok(())
    }

    fn new_multipart_upload(&self, name: &str, key: &str, content_type: &str) -> EngineResult<String> {
        let mut inner = self.write();
        bucket(&inner, name)?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        inner.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: name.to_string(),
                info: UploadInfo {
                    key: key.to_string(),
                    upload_id: upload_id.clone(),
                    initiated: Utc::now(),
                },
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn put_object_part(
        &self,
        name: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> EngineResult<PartInfo> {
        let mut inner = self.write();
        upload(&inner, name, key, upload_id)?;
        let part = PartInfo {
            part_number,
            etag: md5_hex(&data),
            size: data.len() as u64,
            last_modified: Utc::now(),
        };
        if let Some(upload) = inner.uploads.get_mut(upload_id) {
            upload.parts.insert(part_number, (part.clone(), data));
        }
        Ok(part)
    }

    fn list_object_parts(
        &self,
        name: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> EngineResult<ListPartsPage> {
        let inner = self.read();
        let upload = upload(&inner, name, key, upload_id)?;

        let mut remaining = upload
            .parts
            .range(part_number_marker.saturating_add(1)..)
            .map(|(_, (part, _))| part.clone());
        let parts: Vec<PartInfo> = remaining.by_ref().take(max_parts).collect();
        let is_truncated = remaining.next().is_some();
        Ok(ListPartsPage {
            next_part_number_marker: is_truncated
                .then(|| parts.last().map(|p| p.part_number))
                .flatten(),
            parts,
            is_truncated,
        })
    }

    fn complete_multipart_upload(
        &self,
        name: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> EngineResult<ObjectInfo> {
        let mut inner = self.write();
        let upload = upload(&inner, name, key, upload_id)?;

        if parts.is_empty() {
            return Err(EngineError::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(EngineError::InvalidPartOrder);
        }

        let mut body = BytesMut::new();
        let mut etags = Vec::with_capacity(parts.len());
        for wanted in parts {
            let (stored, data) = upload.parts.get(&wanted.part_number).ok_or_else(|| {
                EngineError::InvalidPart(format!("Part {} was not uploaded", wanted.part_number))
            })?;
            if stored.etag != wanted.etag.trim_matches('"') {
                return Err(EngineError::InvalidPart(format!(
                    "ETag mismatch for part {}",
                    wanted.part_number
                )));
            }
            etags.push(stored.etag.as_str());
            body.extend_from_slice(data);
        }

        let data = body.freeze();
        let info = ObjectInfo {
            bucket: name.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
            etag: multipart_etag(&etags),
            content_type: upload.content_type.clone(),
            last_modified: Utc::now(),
            metadata: BTreeMap::new(),
        };

        inner.uploads.remove(upload_id);
        bucket_mut(&mut inner, name)?
            .objects
            .insert(key.to_string(), (info.clone(), data));
        Ok(info)
    }

    fn abort_multipart_upload(&self, name: &str, key: &str, upload_id: &str) -> EngineResult<()> {
        let mut inner = self.write();
        upload(&inner, name, key, upload_id)?;
        inner.uploads.remove(upload_id);
        Ok(())
    }

    fn list_multipart_uploads(
        &self,
        name: &str,
        prefix: &str,
        max_uploads: usize,
    ) -> EngineResult<Vec<UploadInfo>> {
        let inner = self.read();
        bucket(&inner, name)?;
        let mut uploads: Vec<UploadInfo> = inner
            .uploads
            .values()
            .filter(|u| u.bucket == name && u.info.key.starts_with(prefix))
            .map(|u| u.info.clone())
            .collect();
        uploads.sort_by(|a, b| a.key.cmp(&b.key).then(a.initiated.cmp(&b.initiated)));
        uploads.truncate(max_uploads);
        Ok(uploads)
    }
}
