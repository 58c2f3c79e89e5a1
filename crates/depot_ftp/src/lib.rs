use bytes::Bytes;
use depot_core::prelude::*;
use parking_lot::Mutex;
use std::fmt::Display;
use std::io::{self, Cursor, Write};
use std::str::FromStr;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, error, info, instrument};

/// Reply code for "requested file action not taken". ProFTPD answers `LIST`
/// of a missing directory with it.
const FILE_ACTION_NOT_TAKEN: u32 = 450;
/// Reply code for "requested action not taken, file unavailable".
const FILE_UNAVAILABLE: u32 = 550;

/// FTP storage backend.
///
/// Metadata operations share one control connection. [`StorageBackend::open`]
/// dials a dedicated connection so a long upload never holds the shared one.
pub struct FtpStorage {
    location: Location,
    conn: Mutex<FtpStream>,
}

impl FtpStorage {
    pub fn new(location: &str) -> Result<Self, StorageError> {
        Self::connect(Location::parse(location)?)
    }

    pub fn connect(location: Location) -> Result<Self, StorageError> {
        if location.kind != BackendKind::Ftp {
            return Err(StorageError::InvalidLocation(format!(
                "expected an ftp location, got {}",
                location.kind
            )));
        }
        info!(host = %location.address(), root = %location.path, "connecting to ftp");
        let stream = dial(&location)?;
        Ok(Self {
            location,
            conn: Mutex::new(stream),
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    fn remote(&self, path: &str) -> String {
        join_remote(&self.location.path, path)
    }

    fn map_err(&self, op: &'static str, path: &str, err: FtpError) -> StorageError {
        map_ftp_error(&self.location, op, path, err)
    }

    /// `Some(true)` is a directory.
    ///
    /// `SIZE` and `CWD` on the target come first, since plain `LIST` output
    /// commonly hides dotfiles. The parent listing is the fallback for
    /// servers that implement neither.
    fn stat(&self, ftp: &mut FtpStream, remote: &str) -> Result<Option<bool>, StorageError> {
        let (parent, name) = split_remote(remote);
        if name.is_empty() {
            return Ok(Some(true));
        }

        match ftp.size(remote) {
            Ok(_) => return Ok(Some(false)),
            Err(e) => self.refused("stat", remote, e)?,
        }

        let home = ftp.pwd().map_err(|e| self.map_err("stat", remote, e))?;
        match ftp.cwd(remote) {
            Ok(()) => {
                ftp.cwd(&home).map_err(|e| self.map_err("stat", &home, e))?;
                return Ok(Some(true));
            }
            Err(e) => self.refused("stat", remote, e)?,
        }

        let parent = if parent.is_empty() { "." } else { parent };
        match ftp.list(Some(parent)) {
            Ok(lines) => Ok(parse_listing(&lines)
                .into_iter()
                .find(|entry| entry.name == name)
                .map(|entry| entry.is_dir)),
            Err(e) => match self.map_err("stat", remote, e) {
                StorageError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// A negative reply lets the next check run; a broken connection does not.
    fn refused(&self, op: &'static str, path: &str, err: FtpError) -> Result<(), StorageError> {
        match err {
            FtpError::UnexpectedResponse(response) => {
                debug!(path, code = response.status.code(), "{op} refused by server");
                Ok(())
            }
            other => Err(self.map_err(op, path, other)),
        }
    }

    fn remove_tree(&self, ftp: &mut FtpStream, remote: &str) -> Result<(), StorageError> {
        let lines = ftp
            .list(Some(remote))
            .map_err(|e| self.map_err("remove", remote, e))?;
        for entry in parse_listing(&lines) {
            let child = join_remote(remote, &entry.name);
            if entry.is_dir {
                self.remove_tree(ftp, &child)?;
            } else {
                ftp.rm(&child).map_err(|e| self.map_err("remove", &child, e))?;
            }
        }
        ftp.rmdir(remote).map_err(|e| self.map_err("remove", remote, e))
    }
}

impl StorageBackend for FtpStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Ftp
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn exists(&self, path: &str) -> Result<(), StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();
        match self.stat(&mut ftp, &remote)? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(remote)),
        }
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();
        match self.stat(&mut ftp, &remote)? {
            None => return Err(StorageError::NotFound(remote)),
            Some(true) => return Err(StorageError::is_a_directory("read", remote)),
            Some(false) => {}
        }

        debug!("Downloading file over ftp...");
        let buffer = ftp
            .retr_as_buffer(&remote)
            .map_err(|e| self.map_err("read", &remote, e))?;
        Ok(Bytes::from(buffer.into_inner()))
    }

    #[instrument(skip(self, data), fields(host = %self.location.address(), bytes = data.len()))]
    fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();

        debug!("Uploading file over ftp...");
        ftp.put_file(&remote, &mut Cursor::new(data.as_ref()))
            .map_err(|e| self.map_err("write", &remote, e))?;

        debug!("Upload successful");
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();
        match self.stat(&mut ftp, &remote)? {
            None => Err(StorageError::NotFound(remote)),
            Some(true) => self.remove_tree(&mut ftp, &remote),
            Some(false) => ftp
                .rm(&remote)
                .map_err(|e| self.map_err("remove", &remote, e)),
        }
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();

        let mut current = String::new();
        for component in remote.split('/').filter(|c| !c.is_empty()) {
            current = join_remote(&current, component);
            match self.stat(&mut ftp, &current)? {
                Some(true) => continue,
                Some(false) => return Err(StorageError::AlreadyExists(current)),
                None => {
                    debug!(dir = %current, "creating directory");
                    ftp.mkdir(&current)
                        .map_err(|e| self.map_err("mkdir", &current, e))?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let remote = self.remote(path);
        let mut ftp = self.conn.lock();
        match self.stat(&mut ftp, &remote)? {
            None => return Err(StorageError::NotFound(remote)),
            Some(false) => return Err(StorageError::not_a_directory("read_dir", remote)),
            Some(true) => {}
        }

        let lines = ftp
            .list(Some(&remote))
            .map_err(|e| self.map_err("read_dir", &remote, e))?;
        Ok(parse_listing(&lines))
    }

    #[instrument(skip(self), fields(host = %self.location.address()))]
    fn open(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileWriter>, StorageError> {
        let remote = self.remote(path);
        if mode == WriteMode::CreateNew {
            let mut ftp = self.conn.lock();
            if self.stat(&mut ftp, &remote)?.is_some() {
                return Err(StorageError::AlreadyExists(remote));
            }
        }

        let mut ftp = dial(&self.location)?;
        let stream = match mode {
            WriteMode::Append => ftp.append_with_stream(&remote),
            WriteMode::Truncate | WriteMode::CreateNew => ftp.put_with_stream(&remote),
        }
        .map_err(|e| self.map_err("open", &remote, e))?;

        Ok(Box::new(FtpWriter {
            location: self.location.clone(),
            ftp,
            stream: Box::new(stream),
            path: remote,
        }))
    }
}

struct FtpWriter {
    location: Location,
    ftp: FtpStream,
    stream: Box<dyn Write + Send>,
    path: String,
}

impl Write for FtpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl FileWriter for FtpWriter {
    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let FtpWriter {
            location,
            mut ftp,
            mut stream,
            path,
        } = *self;
        stream
            .flush()
            .map_err(|e| StorageError::from_io("flush", path.as_str(), e))?;
        ftp.finalize_put_stream(stream)
            .map_err(|e| map_ftp_error(&location, "finish", &path, e))?;
        if let Err(e) = ftp.quit() {
            debug!("Failed to close ftp data connection cleanly: {e}");
        }
        Ok(())
    }
}

fn dial(location: &Location) -> Result<FtpStream, StorageError> {
    let address = location.address();
    let transport = |message: &dyn Display| {
        error!(host = %address, "ftp connection failed: {message}");
        StorageError::Transport {
            backend: BackendKind::Ftp,
            host: address.clone(),
            message: message.to_string(),
        }
    };

    let mut ftp = FtpStream::connect(address.as_str()).map_err(|e| transport(&e))?;
    let username = location.username.as_deref().unwrap_or("anonymous");
    let password = location.password.as_deref().unwrap_or("anonymous");
    ftp.login(username, password).map_err(|e| transport(&e))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| transport(&e))?;
    Ok(ftp)
}

/// How a reply from the server is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyClass {
    NotFound,
    Other,
}

fn classify_reply(code: u32) -> ReplyClass {
    match code {
        FILE_ACTION_NOT_TAKEN | FILE_UNAVAILABLE => ReplyClass::NotFound,
        _ => ReplyClass::Other,
    }
}

fn map_ftp_error(location: &Location, op: &'static str, path: &str, err: FtpError) -> StorageError {
    match err {
        FtpError::UnexpectedResponse(response)
            if classify_reply(response.status.code()) == ReplyClass::NotFound =>
        {
            StorageError::NotFound(path.to_string())
        }
        FtpError::ConnectionError(e) if e.kind() == io::ErrorKind::NotFound => {
            StorageError::NotFound(path.to_string())
        }
        other => {
            error!(op, path, "ftp error: {other}");
            StorageError::Transport {
                backend: BackendKind::Ftp,
                host: location.address(),
                message: format!("{op} {path}: {other}"),
            }
        }
    }
}

/// Parses `LIST` output, skipping lines that are not entries.
fn parse_listing(lines: &[String]) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = lines
        .iter()
        .filter_map(|line| suppaftp::list::File::from_str(line).ok())
        .filter(|file| file.name() != "." && file.name() != "..")
        .map(|file| DirEntry::new(file.name(), file.is_directory()))
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_unavailable_is_not_found() {
        assert_eq!(classify_reply(550), ReplyClass::NotFound);
        assert_eq!(classify_reply(450), ReplyClass::NotFound);
        assert_eq!(classify_reply(530), ReplyClass::Other);
        assert_eq!(classify_reply(421), ReplyClass::Other);
    }

    #[test]
    fn test_connection_error_maps_to_transport() {
        let location = Location::parse("ftp://example.com/srv").unwrap();
        let err = map_ftp_error(
            &location,
            "read",
            "/srv/a.zip",
            FtpError::ConnectionError(io::Error::from(io::ErrorKind::ConnectionReset)),
        );
        assert!(!err.is_not_exist());
        assert!(!err.is_exist());
        match err {
            StorageError::Transport { backend, host, .. } => {
                assert_eq!(backend, BackendKind::Ftp);
                assert_eq!(host, "example.com:21");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_unix_listing() {
        let lines = vec![
            "drwxr-xr-x    2 ftp      ftp          4096 Nov 05  2020 mods".to_string(),
            "-rw-r--r--    1 ftp      ftp           100 Nov 05  2020 a.zip".to_string(),
            "drwxr-xr-x    2 ftp      ftp          4096 Nov 05  2020 .".to_string(),
            "total 8".to_string(),
        ];
        assert_eq!(
            parse_listing(&lines),
            vec![DirEntry::new("a.zip", false), DirEntry::new("mods", true)]
        );
    }

    #[test]
    fn test_parse_dos_listing() {
        let lines = vec![
            "10-19-20  03:19PM       <DIR>          mods".to_string(),
            "10-19-20  03:19PM                 100 a.zip".to_string(),
        ];
        assert_eq!(
            parse_listing(&lines),
            vec![DirEntry::new("a.zip", false), DirEntry::new("mods", true)]
        );
    }

    #[test]
    fn test_connect_rejects_other_schemes() {
        let location = Location::parse("sftp://example.com/").unwrap();
        assert!(matches!(
            FtpStorage::connect(location),
            Err(StorageError::InvalidLocation(_))
        ));
    }
}
