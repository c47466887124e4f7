//! ZIP archive access for uploaded filings.

use crate::{Error, Result};
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

pub struct Archive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl Archive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            zip: ZipArchive::new(Cursor::new(data))?,
        })
    }

    /// File members in archive order; directory entries are left out.
    pub fn member_names(&self) -> Vec<String> {
        (0..self.zip.len())
            .filter_map(|index| self.zip.name_for_index(index))
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect()
    }

    pub fn read_member(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut file = self.zip.by_name(name)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Find a member by file name, ignoring case and the directory it sits in.
    pub fn find_member(&self, file_name: &str) -> Option<String> {
        let mut names = self.member_names();
        names.sort();
        names.into_iter().find(|name| {
            let base = name.rsplit('/').next().unwrap_or(name);
            base.eq_ignore_ascii_case(file_name)
        })
    }

    /// Unpack every member below `dir`. Entries whose paths would escape
    /// `dir` are rejected by the zip reader.
    pub fn extract_to<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        self.zip.extract(dir.as_ref()).map_err(Error::from)
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }
}
