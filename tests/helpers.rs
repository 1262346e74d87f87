// Shared test helpers: a scripted in-memory pool.
//
// `ScriptedHandle` answers statements from a queue of steps and records when
// each call happened; `ScriptedConnector` hands out prepared handles in order,
// so a test decides exactly which pool a reset produces.

#![allow(dead_code)] // Each test file uses a different subset

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use pg_resilience::{
    ConnectionConfig, Database, DbError, DeploymentContext, PoolConnector, PoolHandle,
    PoolOccupancy, QueryResult, Record, SqlValue,
};

/// What a scripted handle does with one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    ConnectionReset,
    AcquireTimeout,
    UndefinedTable,
    UniqueViolation,
    SerializationFailure,
    /// Succeeds after sleeping for the given time.
    Slow(Duration),
}

impl Step {
    fn error(self) -> Option<DbError> {
        match self {
            Step::Succeed | Step::Slow(_) => None,
            Step::ConnectionReset => Some(DbError::connectivity("connection reset by peer")),
            Step::AcquireTimeout => Some(
                DbError::timeout("pool timed out while waiting for an open connection")
                    .not_dispatched(),
            ),
            Step::UndefinedTable => Some(
                DbError::schema("relation \"missing\" does not exist").with_code("42P01"),
            ),
            Step::UniqueViolation => Some(
                DbError::constraint_violation("duplicate key value violates unique constraint")
                    .with_code("23505"),
            ),
            Step::SerializationFailure => Some(
                DbError::new(
                    pg_resilience::ErrorKind::Query,
                    "could not serialize access due to concurrent update",
                )
                .with_code("40001"),
            ),
        }
    }
}

pub struct ScriptedHandle {
    pub name: &'static str,
    script: Mutex<VecDeque<Step>>,
    /// Used once the script is exhausted.
    fallback: Mutex<Step>,
    calls: Mutex<Vec<(String, Instant)>>,
    closed: AtomicBool,
    active: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedHandle {
    pub fn new(name: &'static str, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(ScriptedHandle {
            name,
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            active: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        })
    }

    pub fn healthy(name: &'static str) -> Arc<Self> {
        ScriptedHandle::new(name, Vec::new(), Step::Succeed)
    }

    pub fn down(name: &'static str) -> Arc<Self> {
        ScriptedHandle::new(name, Vec::new(), Step::ConnectionReset)
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Most calls that were ever running at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

#[async_trait]
impl PoolHandle for ScriptedHandle {
    async fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<QueryResult, DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::connectivity("attempted to acquire a connection on a closed pool")
                .not_dispatched());
        }
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), Instant::now()));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.run_step().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn occupancy(&self) -> PoolOccupancy {
        let active = self.active.load(Ordering::SeqCst);
        PoolOccupancy::from_counts(active + 1, 1, 0, 5)
    }

    async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ScriptedHandle {
    async fn run_step(&self) -> Result<QueryResult, DbError> {
        let step = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(*self.fallback.lock().unwrap())
        };
        if let Some(e) = step.error() {
            return Err(e);
        }
        if let Step::Slow(delay) = step {
            self.active.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        let mut record = Record::new();
        record.push("pool", SqlValue::from(self.name));
        Ok(QueryResult::from_rows(vec![record]))
    }
}

/// Hands out prepared handles in order; fails once they run out.
pub struct ScriptedConnector {
    handles: Mutex<VecDeque<Arc<ScriptedHandle>>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(handles: Vec<Arc<ScriptedHandle>>) -> Arc<Self> {
        Arc::new(ScriptedConnector {
            handles: Mutex::new(handles.into()),
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PoolConnector for ScriptedConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn PoolHandle>, DbError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.handles.lock().unwrap().pop_front() {
            Some(handle) => Ok(handle as Arc<dyn PoolHandle>),
            None => Err(DbError::connectivity("connection refused").not_dispatched()),
        }
    }
}

/// Checks each gap against the expected backoff, allowing timer rounding.
pub fn assert_backoff(gaps: &[Duration], expected_ms: &[u64]) {
    assert_eq!(gaps.len(), expected_ms.len(), "gaps: {:?}", gaps);
    for (gap, expected) in gaps.iter().zip(expected_ms) {
        let expected = Duration::from_millis(*expected);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(20),
            "gap {:?}, expected {:?}",
            gap,
            expected
        );
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new(DeploymentContext::Internal, "postgres://app@db.internal/app")
}

/// Builds a service whose first pool is `first` and whose resets produce `then`, in order.
pub async fn scripted_database(
    first: Arc<ScriptedHandle>,
    then: Vec<Arc<ScriptedHandle>>,
) -> (Database, Arc<ScriptedConnector>) {
    let mut handles = vec![first];
    handles.extend(then);
    let connector = ScriptedConnector::new(handles);
    let db = Database::with_connector(test_config(), Arc::clone(&connector) as Arc<dyn PoolConnector>)
        .await
        .expect("scripted database");
    (db, connector)
}
