//! Disk-backed file collaborator
//!
//! Implements the narrow `FileSys` interface over `std::fs`. Handles are the
//! program's file numbers (1..=255). Sequential input slurps the file and
//! cursors through it, which keeps `INPUT #`/`EOF`/`LOC` simple; output,
//! append, binary and random modes hold the `File` and seek as needed.
//!
//! `BSAVE` writes the classic 7-byte header: `0xFD`, segment, offset,
//! length, all little-endian; `BLOAD` strips it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use qb_lang::error::{ErrorKind, Result, RuntimeError};

use crate::host::{FileOpenMode, FileSys};

const BSAVE_MAGIC: u8 = 0xFD;

fn io_err(context: &str, err: std::io::Error) -> RuntimeError {
    let code = match err.kind() {
        std::io::ErrorKind::NotFound => 53,
        std::io::ErrorKind::PermissionDenied => 70,
        std::io::ErrorKind::AlreadyExists => 58,
        _ => 57,
    };
    RuntimeError::new(ErrorKind::IoError, format!("{context}: {err}")).with_code(code)
}

fn bad_handle(handle: u16) -> RuntimeError {
    RuntimeError::new(ErrorKind::IoError, format!("file #{handle} is not open")).with_code(52)
}

enum Backing {
    /// Sequential input: whole file in memory, byte cursor.
    InText { bytes: Vec<u8>, pos: usize },
    /// Output or append.
    OutText { file: File, written: u64 },
    /// Binary or random access.
    Seekable { file: File, pos: u64 },
}

struct OpenFile {
    mode: FileOpenMode,
    backing: Backing,
}

#[derive(Default)]
pub struct DiskFs {
    open: HashMap<u16, OpenFile>,
}

impl std::fmt::Debug for DiskFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFs")
            .field("open_handles", &self.open.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DiskFs {
    fn get(&mut self, handle: u16) -> Result<&mut OpenFile> {
        self.open.get_mut(&handle).ok_or_else(|| bad_handle(handle))
    }

    /// Byte offset for a GET/PUT position argument per mode: records are
    /// 1-based record numbers, binary positions are 1-based byte offsets.
    fn byte_offset(mode: FileOpenMode, pos: i64) -> Result<u64> {
        if pos < 1 {
            return Err(RuntimeError::new(ErrorKind::IoError, "bad record number").with_code(63));
        }
        Ok(match mode {
            FileOpenMode::Random(len) => (pos as u64 - 1) * len as u64,
            _ => pos as u64 - 1,
        })
    }
}

impl FileSys for DiskFs {
    fn open(&mut self, path: &str, mode: FileOpenMode, handle: u16) -> Result<()> {
        if handle == 0 || handle > 255 {
            return Err(bad_handle(handle));
        }
        if self.open.contains_key(&handle) {
            return Err(
                RuntimeError::new(ErrorKind::IoError, format!("file #{handle} already open"))
                    .with_code(55),
            );
        }
        let backing = match mode {
            FileOpenMode::Input => {
                let mut bytes = Vec::new();
                File::open(path)
                    .and_then(|mut f| f.read_to_end(&mut bytes))
                    .map_err(|e| io_err(path, e))?;
                Backing::InText { bytes, pos: 0 }
            }
            FileOpenMode::Output => {
                let file = File::create(path).map_err(|e| io_err(path, e))?;
                Backing::OutText { file, written: 0 }
            }
            FileOpenMode::Append => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| io_err(path, e))?;
                let written = file.metadata().map(|m| m.len()).unwrap_or(0);
                Backing::OutText { file, written }
            }
            FileOpenMode::Binary | FileOpenMode::Random(_) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| io_err(path, e))?;
                Backing::Seekable { file, pos: 0 }
            }
        };
        self.open.insert(handle, OpenFile { mode, backing });
        Ok(())
    }

    fn close(&mut self, handle: u16) -> Result<()> {
        self.open
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| bad_handle(handle))
    }

    fn close_all(&mut self) {
        self.open.clear();
    }

    fn is_open(&self, handle: u16) -> bool {
        self.open.contains_key(&handle)
    }

    fn eof(&mut self, handle: u16) -> Result<bool> {
        let f = self.get(handle)?;
        Ok(match &f.backing {
            Backing::InText { bytes, pos } => *pos >= bytes.len(),
            Backing::OutText { .. } => true,
            Backing::Seekable { file, pos } => {
                let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                *pos >= len
            }
        })
    }

    fn lof(&mut self, handle: u16) -> Result<i64> {
        let f = self.get(handle)?;
        Ok(match &f.backing {
            Backing::InText { bytes, .. } => bytes.len() as i64,
            Backing::OutText { written, .. } => *written as i64,
            Backing::Seekable { file, .. } => {
                file.metadata().map(|m| m.len()).unwrap_or(0) as i64
            }
        })
    }

    fn loc(&mut self, handle: u16) -> Result<i64> {
        let f = self.get(handle)?;
        Ok(match (&f.backing, f.mode) {
            (Backing::InText { pos, .. }, _) => (*pos as i64).div_euclid(128),
            (Backing::OutText { written, .. }, _) => (*written as i64).div_euclid(128),
            (Backing::Seekable { pos, .. }, FileOpenMode::Random(len)) => {
                *pos as i64 / len.max(1) as i64
            }
            (Backing::Seekable { pos, .. }, _) => *pos as i64,
        })
    }

    fn seek(&mut self, handle: u16, pos: i64) -> Result<()> {
        let mode = self.get(handle)?.mode;
        let target = Self::byte_offset(mode, pos)?;
        match &mut self.get(handle)?.backing {
            Backing::InText { bytes, pos } => {
                *pos = (target as usize).min(bytes.len());
            }
            Backing::OutText { .. } => {
                return Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54));
            }
            Backing::Seekable { pos, .. } => *pos = target,
        }
        Ok(())
    }

    fn freefile(&self) -> u16 {
        (1..=255u16)
            .find(|h| !self.open.contains_key(h))
            .unwrap_or(255)
    }

    fn read_token(&mut self, handle: u16) -> Result<String> {
        let f = self.get(handle)?;
        let Backing::InText { bytes, pos } = &mut f.backing else {
            return Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54));
        };
        // Skip leading whitespace and empty lines
        while *pos < bytes.len() && matches!(bytes[*pos], b' ' | b'\t' | b'\r' | b'\n') {
            *pos += 1;
        }
        if *pos >= bytes.len() {
            return Err(
                RuntimeError::new(ErrorKind::IoError, "input past end of file").with_code(62),
            );
        }
        let mut out = Vec::new();
        if bytes[*pos] == b'"' {
            *pos += 1;
            while *pos < bytes.len() && bytes[*pos] != b'"' {
                out.push(bytes[*pos]);
                *pos += 1;
            }
            if *pos < bytes.len() {
                *pos += 1;
            }
        } else {
            while *pos < bytes.len() && !matches!(bytes[*pos], b',' | b'\r' | b'\n') {
                out.push(bytes[*pos]);
                *pos += 1;
            }
            while out.last() == Some(&b' ') {
                out.pop();
            }
        }
        // Consume one field delimiter
        if *pos < bytes.len() && bytes[*pos] == b',' {
            *pos += 1;
        } else {
            if *pos < bytes.len() && bytes[*pos] == b'\r' {
                *pos += 1;
            }
            if *pos < bytes.len() && bytes[*pos] == b'\n' {
                *pos += 1;
            }
        }
        Ok(bytes_to_basic(&out))
    }

    fn read_line(&mut self, handle: u16) -> Result<String> {
        let f = self.get(handle)?;
        let Backing::InText { bytes, pos } = &mut f.backing else {
            return Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54));
        };
        if *pos >= bytes.len() {
            return Err(
                RuntimeError::new(ErrorKind::IoError, "input past end of file").with_code(62),
            );
        }
        let mut out = Vec::new();
        while *pos < bytes.len() && bytes[*pos] != b'\n' {
            if bytes[*pos] != b'\r' {
                out.push(bytes[*pos]);
            }
            *pos += 1;
        }
        if *pos < bytes.len() {
            *pos += 1;
        }
        Ok(bytes_to_basic(&out))
    }

    fn read_chars(&mut self, handle: u16, n: usize) -> Result<String> {
        let f = self.get(handle)?;
        match &mut f.backing {
            Backing::InText { bytes, pos } => {
                if *pos + n > bytes.len() {
                    return Err(RuntimeError::new(ErrorKind::IoError, "input past end of file")
                        .with_code(62));
                }
                let out = bytes_to_basic(&bytes[*pos..*pos + n]);
                *pos += n;
                Ok(out)
            }
            Backing::Seekable { file, pos } => {
                let mut buf = vec![0u8; n];
                file.seek(SeekFrom::Start(*pos))
                    .and_then(|_| file.read_exact(&mut buf))
                    .map_err(|e| io_err("INPUT$", e))?;
                *pos += n as u64;
                Ok(bytes_to_basic(&buf))
            }
            Backing::OutText { .. } => {
                Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54))
            }
        }
    }

    fn write_text(&mut self, handle: u16, text: &str) -> Result<()> {
        let f = self.get(handle)?;
        let bytes = basic_to_bytes(text);
        match &mut f.backing {
            Backing::OutText { file, written } => {
                file.write_all(&bytes).map_err(|e| io_err("PRINT #", e))?;
                *written += bytes.len() as u64;
                Ok(())
            }
            Backing::Seekable { file, pos } => {
                file.seek(SeekFrom::Start(*pos))
                    .and_then(|_| file.write_all(&bytes))
                    .map_err(|e| io_err("PRINT #", e))?;
                *pos += bytes.len() as u64;
                Ok(())
            }
            Backing::InText { .. } => {
                Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54))
            }
        }
    }

    fn get_bytes(&mut self, handle: u16, pos: Option<i64>, len: usize) -> Result<Vec<u8>> {
        let mode = self.get(handle)?.mode;
        let f = self.get(handle)?;
        let Backing::Seekable { file, pos: cur } = &mut f.backing else {
            return Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54));
        };
        if let Some(p) = pos {
            *cur = Self::byte_offset(mode, p)?;
        }
        // Short reads past EOF zero-fill, matching record semantics
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(*cur))
            .map_err(|e| io_err("GET", e))?;
        let mut filled = 0;
        while filled < len {
            let n = file
                .read(&mut buf[filled..])
                .map_err(|e| io_err("GET", e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        *cur += len as u64;
        Ok(buf)
    }

    fn put_bytes(&mut self, handle: u16, pos: Option<i64>, bytes: &[u8]) -> Result<()> {
        let mode = self.get(handle)?.mode;
        let f = self.get(handle)?;
        let Backing::Seekable { file, pos: cur } = &mut f.backing else {
            return Err(RuntimeError::new(ErrorKind::IoError, "bad file mode").with_code(54));
        };
        if let Some(p) = pos {
            *cur = Self::byte_offset(mode, p)?;
        }
        file.seek(SeekFrom::Start(*cur))
            .and_then(|_| file.write_all(bytes))
            .map_err(|e| io_err("PUT", e))?;
        *cur += bytes.len() as u64;
        Ok(())
    }

    fn record_len(&self, handle: u16) -> Result<Option<u32>> {
        match self.open.get(&handle) {
            Some(f) => Ok(match f.mode {
                FileOpenMode::Random(len) => Some(len),
                _ => None,
            }),
            None => Err(bad_handle(handle)),
        }
    }

    fn kill(&mut self, path: &str) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| io_err(path, e))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(from, to).map_err(|e| io_err(from, e))
    }

    fn chdir(&mut self, path: &str) -> Result<()> {
        std::env::set_current_dir(path).map_err(|e| io_err(path, e))
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        std::fs::create_dir(path).map_err(|e| io_err(path, e))
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        std::fs::remove_dir(path).map_err(|e| io_err(path, e))
    }

    fn list(&mut self, pattern: &str) -> Result<Vec<String>> {
        let (dir, mask) = match pattern.rsplit_once(['/', '\\']) {
            Some((d, m)) => (d.to_string(), m.to_string()),
            None => (".".to_string(), pattern.to_string()),
        };
        let mask = if mask.is_empty() { "*".to_string() } else { mask };
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if glob_match(&mask, &name) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    fn bload(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| io_err(path, e))?;
        if bytes.len() < 7 || bytes[0] != BSAVE_MAGIC {
            return Err(RuntimeError::io(format!("{path} is not a BSAVE image")));
        }
        let length = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
        Ok(bytes[7..7 + length.min(bytes.len() - 7)].to_vec())
    }

    fn bsave(&mut self, path: &str, offset: u16, payload: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(7 + payload.len());
        out.push(BSAVE_MAGIC);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        std::fs::write(path, out).map_err(|e| io_err(path, e))
    }
}

/// Bytes → BASIC string (one char per byte, code points 0..=255).
pub fn bytes_to_basic(bytes: &[u8]) -> String {
    bytes.iter().map(|b| *b as char).collect()
}

/// BASIC string → bytes; chars above 255 degrade to `?`.
pub fn basic_to_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) <= 255 { c as u32 as u8 } else { b'?' })
        .collect()
}

/// DOS-style wildcard match: `*` any run, `?` one char, case-insensitive.
fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.to_ascii_uppercase().chars().collect();
    let n: Vec<char> = name.to_ascii_uppercase().chars().collect();
    fn go(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => go(&p[1..], n) || (!n.is_empty() && go(p, &n[1..])),
            (Some('?'), Some(_)) => go(&p[1..], &n[1..]),
            (Some(c), Some(d)) if c == d => go(&p[1..], &n[1..]),
            _ => false,
        }
    }
    go(&p, &n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();
        let mut fs = DiskFs::default();
        fs.open(path, FileOpenMode::Output, 1).unwrap();
        fs.write_text(1, "hello, 42\n\"quoted, text\",7\n").unwrap();
        fs.close(1).unwrap();

        fs.open(path, FileOpenMode::Input, 1).unwrap();
        assert_eq!(fs.read_token(1).unwrap(), "hello");
        assert_eq!(fs.read_token(1).unwrap(), "42");
        assert_eq!(fs.read_token(1).unwrap(), "quoted, text");
        assert_eq!(fs.read_token(1).unwrap(), "7");
        assert!(fs.eof(1).unwrap());
        let err = fs.read_token(1).unwrap_err();
        assert_eq!(err.code, 62);
    }

    #[test]
    fn test_line_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "first line\r\nsecond").unwrap();
        let mut fs = DiskFs::default();
        fs.open(path.to_str().unwrap(), FileOpenMode::Input, 3).unwrap();
        assert_eq!(fs.read_line(3).unwrap(), "first line");
        assert_eq!(fs.read_line(3).unwrap(), "second");
        assert!(fs.eof(3).unwrap());
    }

    #[test]
    fn test_random_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recs.dat");
        let mut fs = DiskFs::default();
        fs.open(path.to_str().unwrap(), FileOpenMode::Random(4), 1)
            .unwrap();
        fs.put_bytes(1, Some(2), b"BBBB").unwrap();
        fs.put_bytes(1, Some(1), b"AAAA").unwrap();
        assert_eq!(fs.get_bytes(1, Some(2), 4).unwrap(), b"BBBB");
        assert_eq!(fs.get_bytes(1, Some(1), 4).unwrap(), b"AAAA");
        assert_eq!(fs.lof(1).unwrap(), 8);
    }

    #[test]
    fn test_handle_errors() {
        let mut fs = DiskFs::default();
        assert_eq!(fs.close(1).unwrap_err().code, 52);
        assert_eq!(fs.freefile(), 1);
    }

    #[test]
    fn test_bsave_bload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin");
        let path = path.to_str().unwrap();
        let mut fs = DiskFs::default();
        fs.bsave(path, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(fs.bload(path).unwrap(), vec![1, 2, 3, 4]);
        let raw = std::fs::read(path).unwrap();
        assert_eq!(raw[0], 0xFD);
        assert_eq!(raw.len(), 11);
    }

    #[test]
    fn test_glob() {
        assert!(glob_match("*.bas", "GAME.BAS"));
        assert!(glob_match("l?vel*", "Level12.dat"));
        assert!(!glob_match("*.bas", "game.dat"));
    }

    #[test]
    fn test_basic_bytes_round_trip() {
        let s = bytes_to_basic(&[0, 65, 200, 255]);
        assert_eq!(s.chars().count(), 4);
        assert_eq!(basic_to_bytes(&s), vec![0, 65, 200, 255]);
    }
}
