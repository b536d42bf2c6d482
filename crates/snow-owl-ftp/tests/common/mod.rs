//! In-memory FTP server double
//!
//! `MemoryServer` holds a small file tree and hands out `MemoryTransport`
//! connections to it. Tests inject faults per operation, force server-side
//! disconnects, cut data streams part way through, and count calls.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use snow_owl_ftp::reply::{
    FILE_ACTION_OK, FILE_UNAVAILABLE, NOT_LOGGED_IN, PATHNAME_CREATED, PENDING_FURTHER_INFO,
    SYNTAX_ERROR,
};
use snow_owl_ftp::{
    ClientConfig, DataStream, DirEntry, Facts, Reply, Transport, TransportError, TransportResult,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};

pub const USER: &str = "some-user";
pub const PASSWORD: &str = "some-password";
pub const MODIFY: &str = "20240102030405";

/// Transport primitive, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Login,
    Cwd,
    Pwd,
    Command,
    Listing,
    Retrieve,
    Store,
    Close,
}

/// Injected failure
#[derive(Debug, Clone)]
pub enum Fault {
    /// Connection reset by peer
    Reset,
    /// Read timed out
    Timeout,
    /// Negative reply with the given code
    Reply(u16, &'static str),
}

impl Fault {
    fn into_error(self) -> TransportError {
        match self {
            Fault::Reset => TransportError::Io(std::io::Error::from(ErrorKind::ConnectionReset)),
            Fault::Timeout => TransportError::Timeout("timed out".to_string()),
            Fault::Reply(code, text) => TransportError::reply(code, text),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Bytes),
}

struct ServerState {
    nodes: BTreeMap<String, Node>,
    faults: HashMap<Op, VecDeque<Fault>>,
    calls: HashMap<Op, u32>,
    commands: Vec<String>,
    generation: u64,
    drop_stream_after: Option<usize>,
    stall_stream_after: Option<usize>,
    mlst_supported: bool,
    home: String,
}

/// Shared handle on the simulated server
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);

        Self {
            state: Arc::new(Mutex::new(ServerState {
                nodes,
                faults: HashMap::new(),
                calls: HashMap::new(),
                commands: Vec::new(),
                generation: 0,
                drop_stream_after: None,
                stall_stream_after: None,
                mlst_supported: true,
                home: "/".to_string(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// A transport connected to nothing yet
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            server: self.clone(),
            session: None,
        }
    }

    /// Client configuration matching this server's credentials
    pub fn config(&self, retry_budget: u32) -> ClientConfig {
        ClientConfig::new("127.0.0.1", 2121, USER, PASSWORD).with_retry_budget(retry_budget)
    }

    /// Create a directory and its parents
    pub fn mkdir(&self, path: &str) {
        let mut state = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current.push('/');
            current.push_str(part);
            state.nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    /// Create a file, and its parent directories
    pub fn put_file(&self, path: &str, contents: &str) {
        self.mkdir(&parent_of(path));
        self.lock()
            .nodes
            .insert(path.to_string(), Node::File(Bytes::from(contents.to_string())));
    }

    /// Remove a node and everything below it
    pub fn remove(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.lock()
            .nodes
            .retain(|node, _| node != path && !node.starts_with(&prefix));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        match self.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Fail the next call of `op`
    pub fn fail_next(&self, op: Op, fault: Fault) {
        self.fail_times(op, fault, 1);
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_times(&self, op: Op, fault: Fault, times: u32) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(fault.clone());
        }
    }

    /// Number of calls of `op` so far
    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Raw commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Kill every open connection, as an idle timeout would
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    /// Reset the connection after `items` items of the next data stream
    pub fn drop_stream_after(&self, items: usize) {
        self.lock().drop_stream_after = Some(items);
    }

    /// Hang forever after `items` items of the next data stream
    pub fn stall_stream_after(&self, items: usize) {
        self.lock().stall_stream_after = Some(items);
    }

    pub fn set_mlst_supported(&self, supported: bool) {
        self.lock().mlst_supported = supported;
    }

    /// Directory a fresh login lands in
    pub fn set_home(&self, path: &str) {
        self.mkdir(path);
        self.lock().home = path.to_string();
    }
}

struct Session {
    generation: u64,
    logged_in: bool,
    cwd: String,
    rename_from: Option<String>,
}

/// One simulated control connection
pub struct MemoryTransport {
    server: MemoryServer,
    session: Option<Session>,
}

impl MemoryTransport {
    fn begin(&mut self, op: Op) -> TransportResult<()> {
        let fault = {
            let mut state = self.server.lock();
            *state.calls.entry(op).or_default() += 1;
            state.faults.get_mut(&op).and_then(VecDeque::pop_front)
        };

        match fault {
            Some(fault) => {
                let err = fault.into_error();
                if err.is_connection_level() {
                    self.session = None;
                }
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn live(&mut self) -> TransportResult<&mut Session> {
        let generation = self.server.lock().generation;
        let live = matches!(&self.session, Some(session) if session.generation == generation);
        if !live {
            self.session = None;
        }
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    fn logged_in(&mut self) -> TransportResult<&mut Session> {
        let session = self.live()?;
        if session.logged_in {
            Ok(session)
        } else {
            Err(TransportError::reply(
                NOT_LOGGED_IN,
                "530 Please login with USER and PASS.",
            ))
        }
    }

    fn current_dir(&mut self) -> TransportResult<String> {
        Ok(self.logged_in()?.cwd.clone())
    }

    fn change_dir(&mut self, path: &str) -> TransportResult<()> {
        let target = normalize(&self.current_dir()?, path);
        if !matches!(self.server.lock().nodes.get(&target), Some(Node::Dir)) {
            return Err(TransportError::reply(
                FILE_UNAVAILABLE,
                "550 No such file or directory.",
            ));
        }
        self.logged_in()?.cwd = target;
        Ok(())
    }

    fn facts_of(path: &str, node: &Node, wanted: &[String]) -> Facts {
        let mut facts = Facts::new();
        match node {
            Node::Dir => {
                facts.insert("type".to_string(), "dir".to_string());
            }
            Node::File(data) => {
                facts.insert("type".to_string(), "file".to_string());
                facts.insert("size".to_string(), data.len().to_string());
            }
        }
        facts.insert("modify".to_string(), MODIFY.to_string());
        facts.insert("unique".to_string(), format!("{:x}", path.len()));

        if !wanted.is_empty() {
            facts.retain(|key, _| wanted.iter().any(|fact| fact.eq_ignore_ascii_case(key)));
        }
        facts
    }

    /// Entries at `path`: the children of a directory, or the file itself
    ///
    /// A missing entry inside an existing directory lists as empty.
    fn entries_at(&mut self, path: &str) -> TransportResult<Vec<(String, String, Node)>> {
        let target = normalize(&self.current_dir()?, path);
        let state = self.server.lock();

        match state.nodes.get(&target) {
            Some(Node::Dir) => {
                let prefix = if target == "/" {
                    "/".to_string()
                } else {
                    format!("{}/", target)
                };
                Ok(state
                    .nodes
                    .iter()
                    .filter(|(node, _)| {
                        node.len() > prefix.len()
                            && node.starts_with(&prefix)
                            && !node[prefix.len()..].contains('/')
                    })
                    .map(|(node, kind)| {
                        (node[prefix.len()..].to_string(), node.clone(), kind.clone())
                    })
                    .collect())
            }
            Some(file) => Ok(vec![(
                name_of(&target).to_string(),
                target.clone(),
                file.clone(),
            )]),
            None if matches!(state.nodes.get(&parent_of(&target)), Some(Node::Dir)) => {
                Ok(Vec::new())
            }
            None => Err(TransportError::reply(
                FILE_UNAVAILABLE,
                "550 No such file or directory.",
            )),
        }
    }

    fn stream<'a, I: Send + 'a>(&'a mut self, items: VecDeque<I>) -> Box<dyn DataStream<I> + 'a> {
        let (cut_after, stall_after) = {
            let mut state = self.server.lock();
            (state.drop_stream_after.take(), state.stall_stream_after.take())
        };

        Box::new(MemoryStream {
            transport: self,
            items,
            served: 0,
            cut_after,
            stall_after,
        })
    }

    fn execute(&mut self, command: &str) -> TransportResult<Reply> {
        let cwd = self.current_dir()?;
        let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));
        let path = normalize(&cwd, arg);

        let reply = match verb.to_ascii_uppercase().as_str() {
            "NOOP" => Reply::new(200, "200 I successfully done nothin'."),
            "QUIT" => {
                self.session = None;
                Reply::new(221, "221 Goodbye.")
            }
            "OPTS" | "SITE" => Reply::new(200, format!("200 {} OK.", verb)),
            "ABOR" => Reply::new(225, "225 No transfer to ABOR."),
            "ACCT" => Reply::new(202, "202 Command not implemented, superfluous at this site."),
            "CWD" | "XCWD" => {
                self.change_dir(arg)?;
                Reply::new(FILE_ACTION_OK, "250 Directory successfully changed.")
            }
            "CDUP" | "XCUP" => {
                self.change_dir("..")?;
                Reply::new(FILE_ACTION_OK, "250 Directory successfully changed.")
            }
            "MKD" => {
                let mut state = self.server.lock();
                if state.nodes.contains_key(&path)
                    || !matches!(state.nodes.get(&parent_of(&path)), Some(Node::Dir))
                {
                    return Err(TransportError::reply(
                        FILE_UNAVAILABLE,
                        "550 Create directory operation failed.",
                    ));
                }
                state.nodes.insert(path.clone(), Node::Dir);
                Reply::new(PATHNAME_CREATED, format!("257 \"{}\" directory created.", path))
            }
            "RMD" => {
                if !matches!(self.server.lock().nodes.get(&path), Some(Node::Dir)) {
                    return Err(TransportError::reply(FILE_UNAVAILABLE, "550 Remove directory operation failed."));
                }
                self.server.remove(&path);
                Reply::new(FILE_ACTION_OK, "250 Remove directory operation successful.")
            }
            "DELE" => {
                let mut state = self.server.lock();
                if !matches!(state.nodes.get(&path), Some(Node::File(_))) {
                    return Err(TransportError::reply(FILE_UNAVAILABLE, "550 Delete operation failed."));
                }
                state.nodes.remove(&path);
                Reply::new(FILE_ACTION_OK, "250 Delete operation successful.")
            }
            "SIZE" => match self.server.lock().nodes.get(&path) {
                Some(Node::File(data)) => Reply::new(213, format!("213 {}", data.len())),
                _ => return Err(TransportError::reply(FILE_UNAVAILABLE, "550 Could not get file size.")),
            },
            "RNFR" => {
                if !self.server.exists(&path) {
                    return Err(TransportError::reply(FILE_UNAVAILABLE, "550 RNFR command failed."));
                }
                self.logged_in()?.rename_from = Some(path);
                Reply::new(PENDING_FURTHER_INFO, "350 Ready for RNTO.")
            }
            "RNTO" => {
                let Some(from) = self.logged_in()?.rename_from.take() else {
                    return Err(TransportError::reply(503, "503 RNFR required first."));
                };
                let mut state = self.server.lock();
                let prefix = format!("{}/", from);
                let moved: Vec<(String, Node)> = state
                    .nodes
                    .iter()
                    .filter(|(node, _)| **node == from || node.starts_with(&prefix))
                    .map(|(node, kind)| (format!("{}{}", path, &node[from.len()..]), kind.clone()))
                    .collect();
                state
                    .nodes
                    .retain(|node, _| *node != from && !node.starts_with(&prefix));
                state.nodes.extend(moved);
                Reply::new(FILE_ACTION_OK, "250 Rename successful.")
            }
            "MLST" => {
                let state = self.server.lock();
                if !state.mlst_supported {
                    return Err(TransportError::reply(SYNTAX_ERROR, "500 Unknown command."));
                }
                let Some(node) = state.nodes.get(&path) else {
                    return Err(TransportError::reply(FILE_UNAVAILABLE, "550 No such file or directory."));
                };
                let facts = Self::facts_of(&path, node, &[]);
                let rendered: String = facts.iter().map(|(k, v)| format!("{}={};", k, v)).collect();
                Reply::new(
                    FILE_ACTION_OK,
                    format!("250-Listing {}\r\n {} {}\r\n250 End.\r\n", arg, rendered, path),
                )
            }
            _ => {
                return Err(TransportError::reply(
                    SYNTAX_ERROR,
                    format!("500 '{}': command not understood.", command),
                ));
            }
        };

        Ok(reply)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self, _host: &str, _port: u16) -> TransportResult<()> {
        self.begin(Op::Connect)?;
        let (generation, home) = {
            let state = self.server.lock();
            (state.generation, state.home.clone())
        };
        self.session = Some(Session {
            generation,
            logged_in: false,
            cwd: home,
            rename_from: None,
        });
        Ok(())
    }

    async fn login(&mut self, user: &str, password: &str) -> TransportResult<()> {
        self.begin(Op::Login)?;
        let session = self.live()?;
        if user != USER || password != PASSWORD {
            return Err(TransportError::reply(NOT_LOGGED_IN, "530 Login incorrect."));
        }
        session.logged_in = true;
        Ok(())
    }

    async fn cwd(&mut self, path: &str) -> TransportResult<()> {
        self.begin(Op::Cwd)?;
        self.change_dir(path)
    }

    async fn pwd(&mut self) -> TransportResult<String> {
        self.begin(Op::Pwd)?;
        self.current_dir()
    }

    async fn sendcmd(&mut self, command: &str) -> TransportResult<Reply> {
        self.begin(Op::Command)?;
        self.server.lock().commands.push(command.to_string());
        self.execute(command)
    }

    async fn mlsd<'a>(
        &'a mut self,
        path: &str,
        facts: &[String],
    ) -> TransportResult<Box<dyn DataStream<DirEntry> + 'a>> {
        self.begin(Op::Listing)?;
        let entries: VecDeque<DirEntry> = self
            .entries_at(path)?
            .into_iter()
            .map(|(name, full, node)| DirEntry::new(name, Self::facts_of(&full, &node, facts)))
            .collect();

        Ok(self.stream(entries))
    }

    async fn nlst<'a>(&'a mut self, path: &str) -> TransportResult<Box<dyn DataStream<String> + 'a>> {
        self.begin(Op::Listing)?;
        let names: VecDeque<String> = self
            .entries_at(path)?
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();

        Ok(self.stream(names))
    }

    async fn list<'a>(&'a mut self, path: &str) -> TransportResult<Box<dyn DataStream<String> + 'a>> {
        self.begin(Op::Listing)?;
        let lines: VecDeque<String> = self
            .entries_at(path)?
            .into_iter()
            .map(|(name, _, node)| match node {
                Node::Dir => format!("drwxr-xr-x 2 ftp ftp 4096 Jan 02 03:04 {}", name),
                Node::File(data) => {
                    format!("-rw-r--r-- 1 ftp ftp {} Jan 02 03:04 {}", data.len(), name)
                }
            })
            .collect();

        Ok(self.stream(lines))
    }

    fn supports_mlst(&self) -> bool {
        self.server.lock().mlst_supported
    }

    async fn retrieve<'a>(
        &'a mut self,
        path: &str,
    ) -> TransportResult<Box<dyn DataStream<Bytes> + 'a>> {
        self.begin(Op::Retrieve)?;
        let target = normalize(&self.current_dir()?, path);

        let Some(data) = self.server.file(&target) else {
            return Err(TransportError::reply(FILE_UNAVAILABLE, "550 Failed to open file."));
        };
        let chunks: VecDeque<Bytes> = data.chunks(4).map(Bytes::copy_from_slice).collect();

        Ok(self.stream(chunks))
    }

    async fn store(&mut self, path: &str, data: Bytes) -> TransportResult<()> {
        self.begin(Op::Store)?;
        let target = normalize(&self.current_dir()?, path);

        let mut state = self.server.lock();
        if !matches!(state.nodes.get(&parent_of(&target)), Some(Node::Dir)) {
            return Err(TransportError::reply(553, "553 Could not create file."));
        }
        state.nodes.insert(target, Node::File(data));
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.begin(Op::Close);
        self.session = None;
    }
}

/// Data stream that reads over the borrowed connection
struct MemoryStream<'a, I> {
    transport: &'a mut MemoryTransport,
    items: VecDeque<I>,
    served: usize,
    cut_after: Option<usize>,
    stall_after: Option<usize>,
}

#[async_trait]
impl<I: Send> DataStream<I> for MemoryStream<'_, I> {
    async fn next_item(&mut self) -> TransportResult<Option<I>> {
        self.transport.live()?;

        if self.stall_after == Some(self.served) {
            std::future::pending::<()>().await;
        }

        if self.cut_after == Some(self.served) {
            self.transport.session = None;
            return Err(TransportError::Io(std::io::Error::from(
                ErrorKind::ConnectionReset,
            )));
        }

        let item = self.items.pop_front();
        if item.is_some() {
            self.served += 1;
        }
        Ok(item)
    }
}

/// Absolute, normalized form of `path` seen from `cwd`
pub fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }

    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
