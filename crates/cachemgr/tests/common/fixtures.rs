//! Preservation bag fixtures built in memory.

use bagcache_core::hash::Checksum;
use bagcache_storage::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deterministic pseudo-random bytes; the same seed gives the same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    Bytes::from(data)
}

/// Drain a byte stream into memory.
#[allow(dead_code)]
pub async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// A data file and the member bag that holds it.
#[derive(Clone, Debug)]
pub struct DataFile {
    pub filepath: String,
    pub content: Bytes,
    /// Member bag name without extension.
    pub member: String,
    /// Whether the file's component metadata records its checksum.
    pub described_checksum: bool,
}

#[allow(dead_code)]
impl DataFile {
    pub fn new(filepath: &str, content: Bytes, member: &str) -> Self {
        Self {
            filepath: filepath.to_string(),
            content,
            member: member.to_string(),
            described_checksum: true,
        }
    }

    pub fn without_checksum(mut self) -> Self {
        self.described_checksum = false;
        self
    }

    pub fn sha256(&self) -> String {
        Checksum::compute(&self.content).to_hex()
    }

    fn component(&self) -> Value {
        let mut cmp = json!({
            "@id": format!("cmps/{}", self.filepath),
            "@type": ["nrdp:DataFile", "nrdp:DownloadableFile"],
            "filepath": self.filepath,
            "size": self.content.len(),
            "mediaType": "text/csv",
        });
        if self.described_checksum {
            cmp["checksum"] = json!({
                "algorithm": {"tag": "sha256", "@type": "Thing"},
                "hash": self.sha256(),
            });
        }
        cmp
    }
}

fn writer() -> ZipWriter<Cursor<Vec<u8>>> {
    ZipWriter::new(Cursor::new(Vec::new()))
}

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

fn add_entry(zip: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, data: &[u8]) {
    zip.start_file(name, options()).unwrap();
    zip.write_all(data).unwrap();
}

/// Payload and SHA-256 manifest for the files held by bag `root`.
fn add_payload(zip: &mut ZipWriter<Cursor<Vec<u8>>>, root: &str, files: &[DataFile]) {
    let mut manifest = String::new();
    for file in files.iter().filter(|f| f.member == root) {
        add_entry(zip, &format!("{root}/data/{}", file.filepath), &file.content);
        manifest.push_str(&format!("{}  data/{}\n", file.sha256(), file.filepath));
    }
    add_entry(zip, &format!("{root}/manifest-sha256.txt"), manifest.as_bytes());
    add_entry(
        zip,
        &format!("{root}/bagit.txt"),
        b"BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
    );
}

/// A serialized head bag for version `version` of `dsid`, describing
/// `files` and holding the payload of those assigned to `root`.
pub fn head_bag(dsid: &str, version: &str, root: &str, files: &[DataFile]) -> Vec<u8> {
    let mut zip = writer();
    add_payload(&mut zip, root, files);

    let resource = json!({
        "@id": format!("ark:/88434/{dsid}"),
        "ediid": format!("ark:/88434/{dsid}"),
        "title": format!("Test dataset {dsid}"),
        "version": version,
        "components": [],
    });
    add_entry(
        &mut zip,
        &format!("{root}/metadata/nerdm.json"),
        resource.to_string().as_bytes(),
    );

    let mut lookup = String::new();
    for file in files {
        add_entry(
            &mut zip,
            &format!("{root}/metadata/{}/nerdm.json", file.filepath),
            file.component().to_string().as_bytes(),
        );
        lookup.push_str(&format!("data/{}\t{}\n", file.filepath, file.member));
    }
    add_entry(&mut zip, &format!("{root}/multibag/file-lookup.tsv"), lookup.as_bytes());

    let mut members: Vec<&str> = files.iter().map(|f| f.member.as_str()).collect();
    members.sort();
    members.dedup();
    add_entry(
        &mut zip,
        &format!("{root}/multibag/member-bags.tsv"),
        members.join("\n").as_bytes(),
    );

    zip.finish().unwrap().into_inner()
}

/// A serialized member bag holding the files assigned to `root`.
pub fn member_bag(root: &str, files: &[DataFile]) -> Vec<u8> {
    let mut zip = writer();
    add_payload(&mut zip, root, files);
    zip.finish().unwrap().into_inner()
}

/// Write a dataset version's head bag and member bags into a bag store
/// directory, leaving out the member bags named in `omit`.
pub fn write_dataset(
    store: &Path,
    dsid: &str,
    version: &str,
    head: &str,
    files: &[DataFile],
    omit: &[&str],
) {
    std::fs::write(store.join(format!("{head}.zip")), head_bag(dsid, version, head, files)).unwrap();
    let mut members: Vec<&str> = files
        .iter()
        .map(|f| f.member.as_str())
        .filter(|m| *m != head && !omit.contains(m))
        .collect();
    members.sort();
    members.dedup();
    for member in members {
        std::fs::write(store.join(format!("{member}.zip")), member_bag(member, files)).unwrap();
    }
}
