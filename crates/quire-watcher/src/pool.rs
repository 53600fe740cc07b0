//! Background parse workers.
//!
//! The owner of the tree never parses on its own thread. It sends
//! jobs to a small pool of workers over a channel and awaits their
//! replies; workers share nothing with it but the messages.

use quire_core::{parse_source, ParseError, ParsedDocument};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One document to parse. Without `content` the worker reads the file.
#[derive(Debug, Clone)]
pub struct ParseJob {
    pub path: PathBuf,
    pub content: Option<String>,
}

impl ParseJob {
    pub fn from_disk(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn with_content(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }
}

/// Result of one job. Failures still carry a (fallback) document.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub path: PathBuf,
    pub document: ParsedDocument,
    pub failure: Option<String>,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

struct Request {
    job: ParseJob,
    reply: oneshot::Sender<ParseOutcome>,
}

/// A fixed set of parse workers fed through one queue.
pub struct ParsePool {
    tx: mpsc::Sender<Request>,
    workers: Vec<JoinHandle<()>>,
}

impl ParsePool {
    /// Spawns `workers` workers on the current tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Request>(workers * 8);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|n| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(request) = next else {
                            break;
                        };
                        let path = request.job.path.clone();
                        let job = request.job;
                        let outcome = match tokio::task::spawn_blocking(move || run_job(job)).await {
                            Ok(outcome) => outcome,
                            Err(e) => fallback(path, format!("parse task panicked: {}", e)),
                        };
                        if request.reply.send(outcome).is_err() {
                            debug!("Parse result dropped, requester went away");
                        }
                    }
                    debug!("Parse worker {} stopped", n);
                })
            })
            .collect();

        Self {
            tx,
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Parses a batch concurrently and returns outcomes in job order.
    ///
    /// Never fails as a whole: a job that cannot be parsed comes back
    /// as an empty document with its failure recorded.
    pub async fn parse_batch(&self, jobs: Vec<ParseJob>) -> Vec<ParseOutcome> {
        let mut pending = Vec::with_capacity(jobs.len());
        for job in jobs {
            let path = job.path.clone();
            let (reply, rx) = oneshot::channel();
            if self.tx.send(Request { job, reply }).await.is_err() {
                pending.push((path, None));
            } else {
                pending.push((path, Some(rx)));
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (path, rx) in pending {
            let outcome = match rx {
                Some(rx) => match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => fallback(path, "parse worker stopped".to_string()),
                },
                None => fallback(path, "parse pool closed".to_string()),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn parse_one(&self, job: ParseJob) -> ParseOutcome {
        let path = job.path.clone();
        self.parse_batch(vec![job])
            .await
            .pop()
            .unwrap_or_else(|| fallback(path, "parse pool closed".to_string()))
    }
}

impl Drop for ParsePool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

fn run_job(job: ParseJob) -> ParseOutcome {
    let source = match job.content {
        Some(content) => Ok(content),
        None => std::fs::read_to_string(&job.path).map_err(|e| ParseError::io(&job.path, e)),
    };
    match source {
        Ok(source) => ParseOutcome {
            document: parse_source(&source, &job.path),
            path: job.path,
            failure: None,
        },
        Err(e) => fallback(job.path, e.to_string()),
    }
}

fn fallback(path: PathBuf, reason: String) -> ParseOutcome {
    warn!("Failed to parse {}: {}", path.display(), reason);
    ParseOutcome {
        path,
        document: ParsedDocument::fallback(),
        failure: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.md");
        std::fs::write(&good, "[x](x.md)").unwrap();
        let missing = dir.path().join("missing.md");

        let pool = ParsePool::new(2);
        let outcomes = pool
            .parse_batch(vec![
                ParseJob::from_disk(&missing),
                ParseJob::from_disk(&good),
                ParseJob::with_content(dir.path().join("mem.md"), "# hi"),
            ])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].path, missing);
        assert!(!outcomes[0].is_ok());
        assert!(outcomes[0].document.schema.is_empty());
        assert!(outcomes[1].is_ok());
        assert_eq!(outcomes[1].document.links.len(), 1);
        assert!(outcomes[2].is_ok());
    }

    #[tokio::test]
    async fn test_parse_one() {
        let pool = ParsePool::new(1);
        let outcome = pool
            .parse_one(ParseJob::with_content("/n/a.md", "![p](./img/p.png)"))
            .await;
        assert_eq!(outcome.document.links[0].target_path, PathBuf::from("/n/img/p.png"));
    }
}
