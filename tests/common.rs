#![allow(dead_code)]
//! Shared helpers for the integration suites: an instrumented in-memory
//! NTFS volume, a capture source over it, and image-construction utilities.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use wim::apply::{NtfsAttr, NtfsCreateKind, NtfsNode, NtfsVolume, SecurityInformation};
use wim::capture::{CaptureSource, ReparseData, SourceKind, SourceMeta, StreamInfo};
use wim::image::{ImageMetadata, ImageTree};
use wim::lookup::{LookupTable, LookupTableEntry, ResourceLocation};
use wim::ondisk::{FileAttributes, FileTime, ReparseBuffer, Sha1Hash};
use wim::security::SecurityDescriptorSet;
use wim::Wim;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockKind {
    Directory,
    Regular,
}

/// One file on the mock volume. Hard links are two directory entries
/// pointing at the same file index.
#[derive(Debug, Clone)]
pub struct MockFile {
    pub kind: MockKind,
    pub children: BTreeMap<String, usize>,
    /// Stream name -> content; `""` is the unnamed stream.
    pub streams: BTreeMap<String, Vec<u8>>,
    pub attributes: u32,
    pub security: Option<Vec<u8>>,
    pub reparse: Option<Vec<u8>>,
    pub dos_name: Option<String>,
    pub times: Option<(FileTime, FileTime, FileTime)>,
    pub link_count: u32,
}

impl MockFile {
    fn new(kind: MockKind) -> Self {
        Self {
            kind,
            children: BTreeMap::new(),
            streams: BTreeMap::new(),
            attributes: 0,
            security: None,
            reparse: None,
            dos_name: None,
            times: None,
            link_count: 1,
        }
    }
}

/// An in-memory stand-in for an NTFS volume that records every operation,
/// so tests can assert call counts and ordering.
pub struct MockVolume {
    pub files: Vec<MockFile>,
    handles: HashMap<u64, usize>,
    attrs: HashMap<u64, (usize, String)>,
    next_handle: u64,
    pub ops: Vec<String>,
    pub bytes_written: u64,
}

impl MockVolume {
    pub fn new() -> Self {
        Self {
            files: vec![MockFile::new(MockKind::Directory)],
            handles: HashMap::new(),
            attrs: HashMap::new(),
            next_handle: 1,
            ops: Vec::new(),
            bytes_written: 0,
        }
    }

    pub fn lookup_path(&self, path: &str) -> Option<usize> {
        let mut index = 0usize;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            index = *self.files[index].children.get(component)?;
        }
        Some(index)
    }

    pub fn file(&self, path: &str) -> &MockFile {
        &self.files[self.lookup_path(path).expect("path not on volume")]
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops.iter().filter(|op| op.starts_with(prefix)).count()
    }

    pub fn op_position(&self, op: &str) -> usize {
        self.ops
            .iter()
            .position(|o| o == op)
            .unwrap_or_else(|| panic!("operation {op:?} not logged: {:#?}", self.ops))
    }

    pub fn open_handle_count(&self) -> usize {
        self.handles.len() + self.attrs.len()
    }

    fn path_of(&self, index: usize) -> String {
        // Paths are only needed for logging; a linear search keeps the mock
        // simple.
        fn walk(files: &[MockFile], current: usize, target: usize, path: String) -> Option<String> {
            if current == target {
                return Some(if path.is_empty() { "/".into() } else { path });
            }
            for (name, &child) in &files[current].children {
                if let Some(found) = walk(files, child, target, format!("{path}/{name}")) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.files, 0, index, String::new()).unwrap_or_else(|| format!("<orphan {index}>"))
    }

    fn node_index(&self, node: NtfsNode) -> io::Result<usize> {
        self.handles
            .get(&node.0)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "stale inode handle"))
    }

    fn open(&mut self, index: usize) -> NtfsNode {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, index);
        NtfsNode(handle)
    }
}

impl NtfsVolume for MockVolume {
    fn resolve(&mut self, path: &str) -> io::Result<NtfsNode> {
        let index = self
            .lookup_path(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such path {path}")))?;
        self.ops.push(format!("resolve {path}"));
        Ok(self.open(index))
    }

    fn close(&mut self, node: NtfsNode) -> io::Result<()> {
        let index = self.node_index(node)?;
        self.handles.remove(&node.0);
        self.ops.push(format!("close {}", self.path_of(index)));
        Ok(())
    }

    fn create(&mut self, parent: NtfsNode, name: &str, kind: NtfsCreateKind) -> io::Result<NtfsNode> {
        let parent_index = self.node_index(parent)?;
        if self.files[parent_index].children.contains_key(name) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "name exists"));
        }
        let kind = match kind {
            NtfsCreateKind::Directory => MockKind::Directory,
            NtfsCreateKind::Regular => MockKind::Regular,
        };
        let index = self.files.len();
        self.files.push(MockFile::new(kind));
        self.files[parent_index].children.insert(name.to_string(), index);
        self.ops.push(format!("create {}", self.path_of(index)));
        Ok(self.open(index))
    }

    fn link(&mut self, node: NtfsNode, parent: NtfsNode, name: &str) -> io::Result<()> {
        let target = self.node_index(node)?;
        let parent_index = self.node_index(parent)?;
        if self.files[parent_index].children.contains_key(name) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "name exists"));
        }
        self.files[parent_index].children.insert(name.to_string(), target);
        self.files[target].link_count += 1;
        self.ops.push(format!("link {}/{name}", {
            let p = self.path_of(parent_index);
            if p == "/" { String::new() } else { p }
        }));
        Ok(())
    }

    fn attr_open(&mut self, node: NtfsNode, stream_name: &str) -> io::Result<NtfsAttr> {
        let index = self.node_index(node)?;
        self.files[index]
            .streams
            .entry(stream_name.to_string())
            .or_default();
        let handle = self.next_handle;
        self.next_handle += 1;
        self.attrs.insert(handle, (index, stream_name.to_string()));
        self.ops.push(format!("attr_open {}:{stream_name}", self.path_of(index)));
        Ok(NtfsAttr(handle))
    }

    fn attr_pwrite(&mut self, attr: NtfsAttr, offset: u64, data: &[u8]) -> io::Result<usize> {
        let (index, name) = self
            .attrs
            .get(&attr.0)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "stale attr handle"))?;
        let stream = self.files[index].streams.get_mut(&name).unwrap();
        let end = offset as usize + data.len();
        if stream.len() < end {
            stream.resize(end, 0);
        }
        stream[offset as usize..end].copy_from_slice(data);
        self.bytes_written += data.len() as u64;
        self.ops.push(format!("pwrite {} bytes", data.len()));
        Ok(data.len())
    }

    fn attr_close(&mut self, attr: NtfsAttr) {
        self.attrs.remove(&attr.0);
    }

    fn set_attributes(&mut self, node: NtfsNode, attributes: u32) -> io::Result<()> {
        let index = self.node_index(node)?;
        self.files[index].attributes = attributes;
        self.ops.push(format!("set_attributes {}", self.path_of(index)));
        Ok(())
    }

    fn set_security(
        &mut self,
        node: NtfsNode,
        selection: SecurityInformation,
        descriptor: &[u8],
    ) -> io::Result<()> {
        assert_eq!(selection, SecurityInformation::all());
        let index = self.node_index(node)?;
        self.files[index].security = Some(descriptor.to_vec());
        self.ops.push(format!("set_security {}", self.path_of(index)));
        Ok(())
    }

    fn set_reparse_data(&mut self, node: NtfsNode, data: &[u8]) -> io::Result<()> {
        let index = self.node_index(node)?;
        self.files[index].reparse = Some(data.to_vec());
        self.ops.push(format!("set_reparse {}", self.path_of(index)));
        Ok(())
    }

    fn set_dos_name(&mut self, node: NtfsNode, parent: NtfsNode, short_name: &str) -> io::Result<()> {
        let index = self.node_index(node)?;
        self.node_index(parent)?;
        self.files[index].dos_name = Some(short_name.to_string());
        self.ops.push(format!("set_dos_name {} {short_name}", self.path_of(index)));
        Ok(())
    }

    fn set_times(
        &mut self,
        node: NtfsNode,
        creation: FileTime,
        last_write: FileTime,
        last_access: FileTime,
    ) -> io::Result<()> {
        let index = self.node_index(node)?;
        self.files[index].times = Some((creation, last_write, last_access));
        self.ops.push(format!("set_times {}", self.path_of(index)));
        Ok(())
    }
}

/// Capture source reading back from a [`MockVolume`], closing the
/// capture -> apply -> capture loop in tests.
pub struct MockVolumeSource<'a>(pub &'a MockVolume);

impl MockVolumeSource<'_> {
    fn file(&self, path: &Path) -> io::Result<&MockFile> {
        let path = path.to_str().expect("mock paths are UTF-8");
        self.0
            .lookup_path(path)
            .map(|i| &self.0.files[i])
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such path {path}")))
    }
}

impl CaptureSource for MockVolumeSource<'_> {
    fn stat(&mut self, path: &Path) -> wim::Result<SourceMeta> {
        let path_buf = path.to_path_buf();
        let index = self
            .0
            .lookup_path(path.to_str().expect("mock paths are UTF-8"))
            .ok_or_else(|| wim::Error::Stat {
                path: path_buf,
                source: io::Error::new(io::ErrorKind::NotFound, "no such path"),
            })?;
        let file = &self.0.files[index];
        let (creation, last_write, last_access) = file.times.unwrap_or_default();
        Ok(SourceMeta {
            kind: match file.kind {
                MockKind::Directory => SourceKind::Directory,
                MockKind::Regular => SourceKind::Regular,
            },
            attributes: FileAttributes::from_u32(file.attributes),
            creation_time: creation,
            last_write_time: last_write,
            last_access_time: last_access,
            ino: index as u64,
            nlink: file.link_count as u64,
            size: file.streams.get("").map(|s| s.len() as u64).unwrap_or(0),
            unix_data: None,
        })
    }

    fn read_dir(&mut self, path: &Path) -> wim::Result<Vec<String>> {
        let file = self.file(path).map_err(|source| wim::Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.children.keys().cloned().collect())
    }

    fn read_reparse(&mut self, path: &Path) -> wim::Result<ReparseData> {
        let file = self.file(path).map_err(|source| wim::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = file.reparse.clone().expect("not a reparse point");
        let parsed = ReparseBuffer::from_bytes(&raw)?;
        Ok(ReparseData {
            tag: parsed.tag,
            body: parsed.body,
            is_directory: file.kind == MockKind::Directory,
        })
    }

    fn enumerate_streams(&mut self, path: &Path, _meta: &SourceMeta) -> wim::Result<Vec<StreamInfo>> {
        let file = self.file(path).map_err(|source| wim::Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file
            .streams
            .iter()
            .map(|(name, data)| StreamInfo {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.clone())
                },
                size: data.len() as u64,
            })
            .collect())
    }

    fn open_stream(&mut self, path: &Path, stream: &StreamInfo) -> wim::Result<Box<dyn io::Read>> {
        let file = self.file(path).map_err(|source| wim::Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let key = stream.name.clone().unwrap_or_default();
        let data = file.streams.get(&key).cloned().unwrap_or_default();
        Ok(Box::new(io::Cursor::new(data)))
    }

    fn stream_location(&self, path: &Path, stream: &StreamInfo) -> ResourceLocation {
        let file = self.file(path).expect("stream location of missing file");
        let key = stream.name.clone().unwrap_or_default();
        ResourceLocation::AttachedBuffer(file.streams.get(&key).cloned().unwrap_or_default())
    }

    fn read_security(&mut self, path: &Path) -> wim::Result<Option<Vec<u8>>> {
        let file = self.file(path).map_err(|source| wim::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.security.clone())
    }

    fn read_short_name(&mut self, path: &Path) -> wim::Result<Option<Vec<u16>>> {
        let file = self.file(path).map_err(|source| wim::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file
            .dos_name
            .as_ref()
            .map(|name| name.encode_utf16().collect()))
    }
}

/// Builds an image by hand and appends it to `wim`. The callback gets the
/// tree, the archive's content store and the image's SD set; full paths and
/// inode numbers are finalised afterwards.
pub fn build_image(
    wim: &mut Wim,
    name: &str,
    build: impl FnOnce(&mut ImageTree, &mut LookupTable, &mut SecurityDescriptorSet),
) -> i32 {
    let mut tree = ImageTree::new();
    let mut sd_set = SecurityDescriptorSet::new();
    build(&mut tree, wim.lookup_table_mut(), &mut sd_set);
    tree.compute_full_paths();
    tree.renumber_inodes();
    let metadata = ImageMetadata::new(name.to_string(), tree, sd_set, wim.lookup_table_mut());
    wim.add_image_metadata(metadata).expect("fresh image name")
}

/// Registers one reference to `bytes` in the content store and returns the
/// hash to hang off an inode.
pub fn reference_stream(table: &mut LookupTable, bytes: &[u8]) -> Sha1Hash {
    let hash = Sha1Hash::of(bytes);
    let owned = bytes.to_vec();
    table.add_or_ref(hash, move || LookupTableEntry::new_attached(hash, owned));
    hash
}

/// Checks the content-store invariant: every entry's refcount equals the
/// dentry references (via link groups) plus ADS references across all
/// images; no non-metadata entry is unaccounted for.
pub fn check_stream_refcounts(wim: &Wim) {
    let mut counts: HashMap<Sha1Hash, u32> = HashMap::new();
    for image in wim.images() {
        for inode in image.tree.inodes() {
            if let Some(hash) = inode.unnamed {
                *counts.entry(hash).or_default() += inode.link_count() as u32;
            }
            for ads in &inode.ads {
                if let Some(hash) = ads.hash {
                    *counts.entry(hash).or_default() += 1;
                }
            }
        }
    }
    for (hash, expected) in &counts {
        let entry = wim
            .lookup_table()
            .lookup(hash)
            .unwrap_or_else(|| panic!("stream {hash} missing from the lookup table"));
        assert_eq!(entry.refcount, *expected, "refcount mismatch for {hash}");
    }
    for entry in wim.lookup_table().entries() {
        if !entry.is_metadata() {
            assert!(
                counts.contains_key(&entry.hash),
                "unreferenced stream {} in the lookup table",
                entry.hash
            );
        }
    }
}
