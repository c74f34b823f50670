//! Tar archive access for shard archives
//!
//! Members are addressed by file name only; directory entries are skipped.

use std::io::{Cursor, Read};

use ahash::{AHashMap, AHashSet};
use tar::{Archive, Builder, EntryType, Header};

/// Names of all file members, in archive order, duplicates included
pub fn list_members(data: &[u8]) -> std::io::Result<Vec<String>> {
    let mut archive = Archive::new(Cursor::new(data));
    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        if let Some(name) = member_name(&entry.path()?) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Read member contents. With `wanted`, only those members are kept.
/// When a name occurs twice the last member wins, as with tar extraction.
pub fn read_members(
    data: &[u8],
    wanted: Option<&AHashSet<String>>,
) -> std::io::Result<AHashMap<String, Vec<u8>>> {
    let mut archive = Archive::new(Cursor::new(data));
    let mut members = AHashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let Some(name) = member_name(&entry.path()?) else {
            continue;
        };
        if wanted.is_some_and(|wanted| !wanted.contains(&name)) {
            continue;
        }
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buffer)?;
        members.insert(name, buffer);
    }
    Ok(members)
}

fn member_name(path: &std::path::Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// In-memory tar archive being assembled
pub struct ArchiveBuilder {
    builder: Builder<Vec<u8>>,
    members: usize,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            builder: Builder::new(Vec::new()),
            members: 0,
        }
    }

    pub fn append(&mut self, name: &str, data: &[u8]) -> std::io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        self.builder.append_data(&mut header, name, data)?;
        self.members += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Finish the archive and return its bytes
    pub fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        self.builder.into_inner()
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_read() {
        let mut builder = ArchiveBuilder::new();
        builder.append("0.jpg", b"first").unwrap();
        builder.append("1.jpg", b"second").unwrap();
        builder.append("0.jpg", b"again").unwrap();
        let bytes = builder.into_bytes().unwrap();

        assert_eq!(list_members(&bytes).unwrap(), vec!["0.jpg", "1.jpg", "0.jpg"]);

        let all = read_members(&bytes, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["0.jpg"], b"again");

        let wanted: AHashSet<String> = ["1.jpg".to_string()].into_iter().collect();
        let some = read_members(&bytes, Some(&wanted)).unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some["1.jpg"], b"second");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(list_members(&[1u8; 700]).is_err());
    }
}
