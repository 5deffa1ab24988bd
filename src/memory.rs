//! In-memory stand-ins for the hosted store and auth provider, used by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::auth::{AuthProvider, AuthSession};
use crate::error::{AuthError, StoreError};
use crate::models::{IncidentPatch, IncidentRow, Role, Student, User};
use crate::store::{ChangeFeed, ChangeKind, IncidentStore, StudentStore, CHANGE_BUFFER};

pub struct MemoryStore {
    rows: Mutex<Vec<IncidentRow>>,
    students: Mutex<Vec<Student>>,
    changes: broadcast::Sender<ChangeKind>,
    read_delays: Mutex<VecDeque<Duration>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub select_calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            rows: Mutex::new(Vec::new()),
            students: Mutex::new(Vec::new()),
            changes,
            read_delays: Mutex::new(VecDeque::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            select_calls: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    pub fn with_students(students: Vec<Student>) -> Self {
        let store = Self::default();
        *store.students.lock().unwrap() = students;
        store
    }

    /// The next `select_all` snapshots the rows, then waits `delay` before
    /// answering.
    pub fn delay_next_read(&self, delay: Duration) {
        self.read_delays.lock().unwrap().push_back(delay);
    }

    pub fn row_ids(&self) -> Vec<String> {
        self.rows.lock().unwrap().iter().map(|row| row.id.clone()).collect()
    }

    pub fn listeners(&self) -> usize {
        self.changes.receiver_count()
    }

    fn notify(&self, kind: ChangeKind) {
        let _ = self.changes.send(kind);
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn select_all(&self) -> Result<Vec<IncidentRow>, StoreError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read rejected".to_string()));
        }

        let mut rows = self.rows.lock().unwrap().clone();
        rows.reverse();
        let delay = self.read_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn insert_many(&self, rows: &[IncidentRow]) -> Result<(), StoreError> {
        self.check_writes()?;
        {
            let mut stored = self.rows.lock().unwrap();
            for (index, row) in rows.iter().enumerate() {
                let clashes_stored = stored.iter().any(|existing| existing.id == row.id);
                let clashes_batch = rows[..index].iter().any(|earlier| earlier.id == row.id);
                if clashes_stored || clashes_batch {
                    return Err(StoreError::Constraint(format!(
                        "duplicate key value violates unique constraint: id {}",
                        row.id
                    )));
                }
            }

            let now = Utc::now();
            stored.extend(rows.iter().cloned().map(|mut row| {
                row.created_at = Some(now);
                row.updated_at = Some(now);
                row
            }));
        }
        self.notify(ChangeKind::Insert);
        Ok(())
    }

    async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<(), StoreError> {
        self.check_writes()?;
        {
            let mut stored = self.rows.lock().unwrap();
            if let Some(row) = stored.iter_mut().find(|row| row.id == id) {
                patch.apply(row);
                row.updated_at = Some(Utc::now());
            }
        }
        self.notify(ChangeKind::Update);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_writes()?;
        self.rows.lock().unwrap().retain(|row| row.id != id);
        self.notify(ChangeKind::Delete);
        Ok(())
    }

    async fn changes(&self) -> Result<ChangeFeed, StoreError> {
        let mut source = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(kind) => {
                        if tx.send(kind).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ChangeFeed::new(rx, Some(forwarder)))
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn all_students(&self) -> Result<Vec<Student>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read rejected".to_string()));
        }
        Ok(self.students.lock().unwrap().clone())
    }

    async fn upsert_students(&self, students: &[Student]) -> Result<u64, StoreError> {
        self.check_writes()?;
        let mut stored = self.students.lock().unwrap();
        for student in students {
            match stored.iter_mut().find(|existing| existing.ra == student.ra) {
                Some(existing) => *existing = student.clone(),
                None => stored.push(student.clone()),
            }
        }
        Ok(students.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, (String, User)>>,
    /// Profile lookups find nothing, as if the user row was never created.
    pub hide_profiles: AtomicBool,
    sign_in_attempts: Arc<AtomicU64>,
    sign_outs: Arc<AtomicU64>,
}

impl MemoryAuth {
    pub fn add_account(&self, email: &str, password: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            full_name: None,
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_lowercase(), (password.to_string(), user.clone()));
        user
    }

    pub fn sign_in_attempts(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sign_in_attempts)
    }

    pub fn sign_outs(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sign_outs)
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.sign_in_attempts.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.lock().unwrap();
        match accounts.get(&email.to_lowercase()) {
            Some((stored, user)) if stored == password => Ok(AuthSession { user_id: user.id }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        if self.hide_profiles.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .values()
            .find(|(_, user)| user.id == user_id)
            .map(|(_, user)| user.clone()))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<(AuthSession, User), AuthError> {
        let mut accounts = self.accounts.lock().unwrap();
        let key = email.to_lowercase();
        if accounts.contains_key(&key) {
            return Err(AuthError::Provider("User already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            full_name: Some(full_name.to_string()),
        };
        accounts.insert(key, (password.to_string(), user.clone()));
        Ok((AuthSession { user_id: user.id }, user))
    }

    async fn sign_out(&self, _session: &AuthSession) -> Result<(), AuthError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Local HTTP endpoint that answers every request with `500` and counts the
/// requests it has fully read.
pub async fn counting_endpoint() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                if read_request(&mut socket).await.unwrap_or(false) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\n\
                          content-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{address}/exec"), hits)
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<bool> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = socket.read(&mut chunk).await?;
        if read == 0 {
            return Ok(false);
        }
        request.extend_from_slice(&chunk[..read]);

        let Some(end) = request.windows(4).position(|window| window == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if request.len() >= end + 4 + body_len {
            return Ok(true);
        }
    }
}
