use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{Issue, LintContext, LintError, LintFile, Linter};

/// One unit of work: a linter over files that share effective settings.
pub struct LintJob {
    pub linter: Arc<dyn Linter>,
    pub files: Vec<LintFile>,
    pub settings: Map<String, Value>,
}

impl LintJob {
    pub fn new(linter: Arc<dyn Linter>, files: Vec<LintFile>, settings: Map<String, Value>) -> Self {
        Self {
            linter,
            files,
            settings,
        }
    }
}

/// Group (linter, file, settings) triples into jobs.
///
/// Batch-capable linters get one job per distinct settings object; others
/// get one job per file.
pub fn plan_jobs(items: Vec<(Arc<dyn Linter>, LintFile, Map<String, Value>)>) -> Vec<LintJob> {
    let mut jobs: Vec<LintJob> = Vec::new();
    let mut batch_index: HashMap<(&'static str, String), usize> = HashMap::new();

    for (linter, file, settings) in items {
        if linter.supports_batch() {
            let key = (linter.name(), Value::Object(settings.clone()).to_string());
            if let Some(&i) = batch_index.get(&key) {
                jobs[i].files.push(file);
                continue;
            }
            batch_index.insert(key, jobs.len());
        }
        jobs.push(LintJob::new(linter, vec![file], settings));
    }
    jobs
}

/// Run jobs concurrently, at most `workers` at a time, collecting issues per file.
///
/// Every failure is folded into an issue for the affected file, so one
/// adapter can never take down the others.
pub async fn run_jobs(jobs: Vec<LintJob>, workers: usize, ctx: &LintContext) -> BTreeMap<PathBuf, Vec<Issue>> {
    let results: Arc<Mutex<HashMap<PathBuf, Vec<Issue>>>> = Arc::new(Mutex::new(HashMap::new()));
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for job in jobs {
        {
            let mut map = results.lock();
            for file in &job.files {
                map.entry(file.path.clone()).or_default();
            }
        }
        let results = results.clone();
        let permits = permits.clone();
        let ctx = ctx.clone();
        set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let name = job.linter.name();
            let run = AssertUnwindSafe(execute(&job, &ctx)).catch_unwind();
            let per_file = match tokio::time::timeout_at(ctx.deadline, run).await {
                Ok(Ok(per_file)) => per_file,
                Ok(Err(panic)) => {
                    let message = panic_message(panic.as_ref());
                    fail_all(&job, || LintError::Panicked {
                        tool: name.to_string(),
                        message: message.clone(),
                    })
                }
                Err(_) => fail_all(&job, || LintError::Timeout {
                    tool: name.to_string(),
                }),
            };

            let mut issue_count = 0u64;
            let mut map = results.lock();
            for (path, result) in per_file {
                let issues = match result {
                    Ok(issues) => issues,
                    Err(e) => {
                        log::warn!("{name} failed on {}: {e}", path.display());
                        vec![e.into_issue(&path, name)]
                    }
                };
                issue_count += issues.len() as u64;
                map.entry(path).or_default().extend(issues);
            }
            drop(map);
            ctx.cache
                .record_linter(name, job.files.len() as u64, issue_count);
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            log::error!("lint task panicked: {e}");
        }
    }

    let mut map = std::mem::take(&mut *results.lock());
    map.values_mut()
        .for_each(|issues| issues.sort_by_key(|i| (i.line, i.column)));
    map.into_iter().collect()
}

fn fail_all(job: &LintJob, err: impl Fn() -> LintError) -> Vec<(PathBuf, Result<Vec<Issue>, LintError>)> {
    job.files.iter().map(|f| (f.path.clone(), Err(err()))).collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn execute(job: &LintJob, ctx: &LintContext) -> Vec<(PathBuf, Result<Vec<Issue>, LintError>)> {
    if job.files.len() > 1 && job.linter.supports_batch() {
        let mut batch = job.linter.lint_batch(&job.files, &job.settings, ctx).await;
        // Any file the adapter forgot to report on counts as clean.
        return job
            .files
            .iter()
            .map(|f| {
                let result = batch.remove(&f.path).unwrap_or_else(|| Ok(Vec::new()));
                (f.path.clone(), result)
            })
            .collect();
    }
    let mut out = Vec::with_capacity(job.files.len());
    for file in &job.files {
        out.push((file.path.clone(), job.linter.lint(file, &job.settings, ctx).await));
    }
    out
}
