use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vocab_drill::auth::{AuthSession, StaticAuth};
use vocab_drill::content::{Curriculum, Lesson};
use vocab_drill::drill::Direction;
use vocab_drill::remote::{HttpRemote, MemoryRemote, RemoteError, RemoteStore, TokenManager};
use vocab_drill::session::SessionKind;
use vocab_drill::store::{FsBackend, LocalStore};
use vocab_drill::{Config, DrillMode, SyncEngine};

#[derive(Parser)]
#[command(name = "vocab-drill")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show progress and sync state
    Status,
    /// Push local progress to the remote store now
    Sync,
    /// Drill a lesson
    Drill {
        /// Book number
        book: u32,
        /// Lesson number
        lesson: u32,
        /// english-arabic, arabic-english or mixed
        #[arg(short, long, default_value = "english-arabic")]
        mode: DrillMode,
        /// Only words answered wrong before
        #[arg(long, conflicts_with = "final_test")]
        review: bool,
        /// Take the lesson's final test
        #[arg(long = "final")]
        final_test: bool,
    },
    /// Reset progress for one lesson, or everything
    Reset {
        /// Book number (with --lesson resets one lesson)
        #[arg(long, requires = "lesson")]
        book: Option<u32>,
        /// Lesson number
        #[arg(long, requires = "book")]
        lesson: Option<u32>,
    },
    /// Configure the remote store and sign in
    Login {
        /// Learner id on the remote store
        user: String,
        /// Base URL of the remote store
        #[arg(long)]
        url: Option<String>,
        /// API token, stored in the system keyring
        #[arg(long)]
        token: Option<String>,
        /// Email shown alongside your progress
        #[arg(long)]
        email: Option<String>,
        /// Display name shown alongside your progress
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out and forget the API token
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocab_drill=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Login { user, url, token, email, name } => {
            if let Some(token) = token {
                TokenManager::set_token(&token)?;
                println!("Token saved ({})", TokenManager::mask(token.trim()));
            }
            config.user_id = Some(user);
            if url.is_some() {
                config.remote_url = url;
            }
            if email.is_some() {
                config.email = email;
            }
            if name.is_some() {
                config.display_name = name;
            }
            config.save()?;
            println!("Signed in. Run `vocab-drill sync` to pull your progress.");
        }
        Commands::Logout => {
            match TokenManager::delete_token() {
                Ok(()) | Err(RemoteError::TokenNotFound) => {}
                Err(e) => tracing::warn!(error = %e, "Could not remove stored token"),
            }
            config.user_id = None;
            config.save()?;
            println!("Signed out. Progress stays on this device.");
        }
        Commands::Status => {
            let engine = open_engine(&config)?;
            engine.connect().await?;
            print_status(&engine, &config)?;
            engine.shutdown().await;
        }
        Commands::Sync => {
            let engine = open_engine(&config)?;
            if !engine.connect().await? {
                bail!("Not signed in. Run `vocab-drill login` first");
            }
            if engine.request_immediate_sync().await {
                println!("Progress synced.");
            } else if let Some(failure) = engine.status().last_failure {
                println!("Sync failed: {}", failure.message);
            } else {
                println!("Nothing new to sync.");
            }
        }
        Commands::Drill { book, lesson, mode, review, final_test } => {
            let curriculum = Curriculum::load_dir(&config.content_dir()?)?;
            let lesson = curriculum
                .lesson(book, lesson)
                .with_context(|| format!("Book {book} has no lesson {lesson}"))?
                .clone();
            let engine = open_engine(&config)?;
            engine.connect().await?;

            if !engine.is_lesson_unlocked(&curriculum, book, lesson.lesson) {
                bail!("{} is locked. Master the previous lesson first", lesson.label());
            }

            let kind = if final_test {
                SessionKind::FinalTest
            } else if review {
                SessionKind::ReviewMistakes
            } else {
                SessionKind::Practice
            };
            run_drill(&engine, &lesson, mode, kind).await?;
            engine.shutdown().await;
        }
        Commands::Reset { book, lesson } => {
            let engine = open_engine(&config)?;
            engine.connect().await?;
            let curriculum = Curriculum::load_dir(&config.content_dir()?)?;
            match (book, lesson) {
                (Some(book), Some(lesson)) => {
                    let lesson = curriculum
                        .lesson(book, lesson)
                        .with_context(|| format!("Book {book} has no lesson {lesson}"))?;
                    engine.reset_lesson(lesson)?;
                    println!("{} reset.", lesson.label());
                }
                _ => {
                    engine.reset_all(&curriculum)?;
                    println!("All progress reset.");
                }
            }
            engine.shutdown().await;
        }
    }

    Ok(())
}

/// Build the engine for the configured learner; offline when no remote is set
fn open_engine(config: &Config) -> Result<SyncEngine> {
    let store = Arc::new(LocalStore::new(FsBackend::new(Config::store_dir()?)));

    let (remote, auth): (Arc<dyn RemoteStore>, Arc<dyn AuthSession>) =
        match (&config.remote_url, &config.user_id) {
            (Some(url), Some(user_id)) => {
                let token = match TokenManager::get_token() {
                    Ok(token) => Some(token),
                    Err(RemoteError::TokenNotFound) => None,
                    Err(e) => return Err(e.into()),
                };
                let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemote::new(url.as_str(), token)?);
                let mut auth = StaticAuth::signed_in(user_id);
                if let Some(profile) = config.profile() {
                    auth = auth.with_profile(profile);
                }
                let auth: Arc<dyn AuthSession> = Arc::new(auth);
                (remote, auth)
            }
            _ => {
                let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
                let auth: Arc<dyn AuthSession> = Arc::new(StaticAuth::anonymous());
                (remote, auth)
            }
        };

    Ok(SyncEngine::new(store, remote, auth, config.sync.clone()))
}

fn print_status(engine: &SyncEngine, config: &Config) -> Result<()> {
    let doc = engine.store().load();
    let status = engine.status();

    println!("Words mastered: {}", doc.mastered_count());
    if let (Some(book), Some(lesson)) = (doc.last_book, doc.last_lesson) {
        let mode = doc.last_mode.map(|m| m.to_string()).unwrap_or_default();
        println!("Last drill: book {book}, lesson {lesson} {mode}");
    }

    if let Ok(curriculum) = Curriculum::load_dir(&config.content_dir()?) {
        for (book, lessons) in &curriculum.books {
            for lesson in lessons {
                let state = engine.lesson_state(*book, lesson.lesson);
                let mark = if state.is_complete() {
                    "done"
                } else if engine.is_lesson_unlocked(&curriculum, *book, lesson.lesson) {
                    "open"
                } else {
                    "locked"
                };
                println!("  {:<24} {mark}", lesson.label());
            }
        }
    }

    match &config.user_id {
        Some(user) if status.connected => println!("Sync: signed in as {user} ({:?})", status.phase),
        _ => println!("Sync: offline"),
    }
    if let Some(at) = status.last_success_at {
        println!("Last synced: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(failure) = &status.last_failure {
        println!("Warning: {}", failure.message);
    }
    if status.corruption_detected {
        println!("Warning: unreadable local data was replaced with an empty document");
    }
    Ok(())
}

async fn run_drill(
    engine: &SyncEngine,
    lesson: &Lesson,
    mode: DrillMode,
    kind: SessionKind,
) -> Result<()> {
    let mut session = engine.resume_or_start(lesson, mode, kind)?;
    if session.resumed {
        println!("Resuming {} ({} left)", lesson.label(), session.queue.len());
    } else {
        println!("{} - {} ({} questions)", lesson.label(), kind, session.queue.len());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(item) = session.current().cloned() {
        let direction = Direction::for_question(mode, session.tally.attempted as usize);
        print!("{} > ", direction.prompt(&item));
        io::stdout().flush()?;

        let Some(answer) = lines.next_line().await? else {
            println!();
            println!("Paused. Run the same command to continue.");
            return Ok(());
        };
        let is_correct = direction.check(&item, &answer);
        engine.answer_and_advance(&mut session, lesson, is_correct)?;

        if is_correct {
            println!("  correct");
        } else {
            let expected = match direction {
                Direction::ToArabic => &item.arabic,
                Direction::ToEnglish => &item.english,
            };
            println!("  expected: {expected}");
        }
    }

    let tally = session.tally;
    println!("Done: {}/{} correct", tally.correct, tally.attempted);
    if kind == SessionKind::FinalTest {
        let passed = tally.attempted > 0 && tally.incorrect == 0;
        engine.complete_final_test(lesson, passed)?;
        println!("{}", if passed { "Final test passed!" } else { "Final test not passed, try again." });
    }
    if engine.lesson_state(lesson.book, lesson.lesson).mastered {
        println!("{} mastered.", lesson.label());
    }
    Ok(())
}
