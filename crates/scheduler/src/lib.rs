//! Concurrency core of the chime alarm scheduler.
//!
//! One producer (the [`Scheduler`] owner) submits commands, one dispatcher
//! task applies them to a shared alarm registry, and one worker task per
//! message type fires the alarms it has adopted:
//! * `Gate`: reader/writer access to the registry, built from two semaphores
//! * `CommandQueue`: coalescing schedule, start-worker and cancel lists
//! * `Handshake`: rendezvous that lets the dispatcher change or remove an alarm a worker holds
//! * `SchedulerEvent`: everything observable, fanned out to subscribers and [`Observer`]s

mod alarm;
mod command;
mod config;
mod dispatcher;
mod error;
mod event;
mod gate;
mod handshake;
mod index;
mod observer;
mod queue;
mod registry;
mod role;
mod scheduler;
mod shared;
mod spawn;
mod token;
mod worker;

pub use alarm::{AlarmKey, AlarmMessage, AlarmSnapshot, MAX_MESSAGE_LEN, MsgType, WaitTime, WorkerId};
pub use command::{CancelRequest, Command, ScheduleRequest, StartWorkerRequest, SubmitOutcome, SuppressReason};
pub use config::SchedulerConfig;
pub use error::{FatalError, Phase, Primitive, Result, StartError, SubmitError};
pub use event::{DetachReason, SchedulerEvent, Termination};
pub use observer::{LogObserver, Observer};
pub use role::TaskRole;
pub use scheduler::Scheduler;
pub use worker::{WorkerExit, WorkerSnapshot};
