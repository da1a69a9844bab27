use std::path::PathBuf;
use std::sync::LazyLock;

use db::{DbConfig, DbError};
use pipeline::{CommandFuture, CommandOutput, CommandRunner, CommandSpec};
use tokio::sync::{Mutex, MutexGuard};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE deploy_message; DELETE deployment;")
        .await?;
    Ok(guard)
}

/// Clones an npm project and "builds" `dist/index.html`.
pub struct StaticSiteRunner;

impl CommandRunner for StaticSiteRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> CommandFuture<'a> {
        Box::pin(async move {
            match spec.program.as_str() {
                "git" => {
                    let target = PathBuf::from(spec.args.last().cloned().unwrap_or_default());
                    tokio::fs::write(target.join("package-lock.json"), "{}").await.unwrap();
                    tokio::fs::write(target.join("package.json"), "{}").await.unwrap();
                }
                _ => {
                    let dist = spec.cwd.clone().unwrap().join("dist");
                    tokio::fs::create_dir_all(&dist).await.unwrap();
                    tokio::fs::write(dist.join("index.html"), "<h1>hi</h1>").await.unwrap();
                }
            }
            Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        })
    }
}
