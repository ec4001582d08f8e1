use std::{error::Error, sync::Arc, thread};

use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use getup::{
    communication::{Message, MessageType},
    config::Config,
    trigger::TriggerPlan,
    AlarmDraft, AlarmError, AlarmPatch, AlarmRepository, AlarmSound, AlarmType, Days, FsKeyStore,
    InMemoryScheduler,
};

#[derive(Parser)]
/// Manage stored alarms. Scheduling goes to an in-process stand-in, so
/// nothing registered here will actually ring.
#[command(author, version, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// write the default config and create the alarm store
    Init {
        #[clap(long, short)]
        force: bool,
    },
    NewAlarm {
        kind: AlarmType,
        sound: AlarmSound,
        /// HH:MM, 24 hour
        #[clap(value_parser = parse_time)]
        time: NaiveTime,
        /// e.g. `mon,wed`, `weekdays`, `daily` or `none`
        #[clap(long, short, default_value = "none")]
        days: Days,
    },
    EditAlarm {
        id: u64,
        #[clap(long = "type")]
        kind: Option<AlarmType>,
        #[clap(long)]
        sound: Option<AlarmSound>,
        #[clap(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
        #[clap(long, short)]
        days: Option<Days>,
        #[clap(long, conflicts_with = "disable")]
        enable: bool,
        #[clap(long)]
        disable: bool,
    },
    DeleteAlarm {
        id: u64,
    },
    List,
    /// register every stored alarm with the scheduler again
    Reconcile,
    /// retry scheduling an alarm that was saved but not scheduled
    Reschedule {
        id: u64,
    },
    /// retry cancelling an alarm that was deleted but not cancelled
    RetryCancel {
        id: u64,
    },
}

fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s, "%H:%M")
}

fn report(err: AlarmError) -> Box<dyn Error> {
    match &err {
        AlarmError::PartiallyPersisted { alarm, .. } => {
            eprintln!(
                "alarm {} was saved but may not ring, run `getup reschedule {}`",
                alarm.id, alarm.id
            );
        }
        AlarmError::PartiallyDeleted { id, .. } => {
            eprintln!("alarm {id} was deleted but may still ring, run `getup retry-cancel {id}`");
        }
        _ => {}
    }
    err.into()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("getup").expect("couldn't initialize logger");

    let args = Args::parse();
    let config_path = Config::config_path()?;

    if let Command::Init { force } = args.command {
        if force || !Config::is_config_present() {
            Config::new().save(config_path.clone())?;
            println!("wrote {}", config_path.display());
        }
        let config = Config::load(config_path)?;
        let store = FsKeyStore::open(config.store_dir()?)?;
        println!("alarm store at {}", store.dir().display());
        return Ok(());
    }

    let config = Config::load_or_default(config_path)?;
    let store = FsKeyStore::open(config.store_dir()?)?;

    let (tx, rx) = std::sync::mpsc::channel::<Message>();
    let listener = thread::spawn(move || {
        for message in rx {
            match message.kind {
                MessageType::Diverged { reason } => {
                    log::warn!("alarm {} out of sync: {reason}", message.alarm_id);
                }
                kind => log::info!("alarm {} {kind:?}", message.alarm_id),
            }
        }
    });

    // registrations only live as long as this process
    log::warn!("no native scheduler on this platform, scheduling is a dry run");
    let repo = AlarmRepository::new(Arc::new(store), Arc::new(InMemoryScheduler::new()))
        .with_timeouts(config.timeouts)
        .with_sender(tx);

    match args.command {
        Command::Init { .. } => {}
        Command::NewAlarm {
            kind,
            sound,
            time,
            days,
        } => {
            let mut draft = AlarmDraft {
                kind: Some(kind),
                sound: Some(sound),
                days,
                ..AlarmDraft::new()
            };
            draft.set_time(time);
            let alarm = repo.create(draft).await.map_err(report)?;
            println!("{alarm}");
        }
        Command::EditAlarm {
            id,
            kind,
            sound,
            time,
            days,
            enable,
            disable,
        } => {
            let mut patch = AlarmPatch {
                kind,
                sound,
                days,
                enabled: if enable {
                    Some(true)
                } else if disable {
                    Some(false)
                } else {
                    None
                },
                ..AlarmPatch::new()
            };
            if let Some(time) = time {
                patch = patch.time(time);
            }
            if patch.is_empty() {
                return Err(format!("nothing to change for alarm {id}").into());
            }
            let alarm = repo.update(id, patch).await.map_err(report)?;
            println!("{alarm}");
        }
        Command::DeleteAlarm { id } => {
            repo.delete(id).await.map_err(report)?;
            println!("deleted alarm {id}");
        }
        Command::List => {
            let now = chrono::Local::now().naive_local();
            for alarm in repo.list().await? {
                match TriggerPlan::for_alarm(&alarm, now).next_fire() {
                    Some(next) if alarm.enabled => println!("{alarm} next: {next}"),
                    _ => println!("{alarm}"),
                }
            }
        }
        Command::Reconcile => {
            let report = repo.reconcile().await?;
            println!(
                "scheduled {:?}, cancelled {:?}",
                report.scheduled, report.cancelled
            );
            for failure in &report.failed {
                eprintln!("{failure}");
            }
        }
        Command::Reschedule { id } => {
            let alarm = repo.reschedule(id).await?;
            println!("{alarm}");
        }
        Command::RetryCancel { id } => {
            repo.retry_cancel(id).await?;
            println!("cancelled alarm {id}");
        }
    }

    // closes the channel so the listener finishes
    drop(repo);
    if listener.join().is_err() {
        log::error!("message listener panicked");
    }
    Ok(())
}
