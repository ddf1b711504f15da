use crate::core::{Actor, ActorContext, Socket};
use async_trait::async_trait;
use std::fmt::Display;
use LoggerMsg::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
  Off,
}
impl LogLevel {
  pub const MIN: LogLevel = LogLevel::Trace;
}

pub enum LoggerMsg {
  Log(LogLevel, Box<dyn Display + Send + 'static>),
  SetLevel(LogLevel),
}

/// Prints log lines for one [`Node`](crate::core::Node), prefixed with its socket.
pub struct Logger {
  level: LogLevel,
  socket: Socket,
}
impl Logger {
  pub fn new(level: LogLevel, socket: Socket) -> Self {
    Logger {
      level: level,
      socket: socket,
    }
  }
}
#[async_trait]
impl Actor<LoggerMsg> for Logger {
  async fn recv(&mut self, _: &ActorContext<LoggerMsg>, msg: LoggerMsg) {
    match msg {
      Log(level, s) => {
        if level >= self.level {
          println!("{} {:?}: {}", self.socket, level, s);
        }
      }
      SetLevel(level) => self.level = level,
    }
  }
}

/// Sends `$msg` to `$logger` if `$at` passes the module's `$level`. `$logger` is anything with a
/// `log(LoggerMsg)` method.
#[macro_export]
macro_rules! log_at {
  ($at:expr, $level:expr, $logger:expr, $msg:expr) => {
    if $at >= $level {
      $logger.log($crate::testkit::LoggerMsg::Log(
        $at,
        ::std::boxed::Box::new($msg),
      ));
    }
  };
}

#[macro_export]
macro_rules! trace {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Trace, $level, $logger, $msg)
  };
}

#[macro_export]
macro_rules! debug {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Debug, $level, $logger, $msg)
  };
}

#[macro_export]
macro_rules! info {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Info, $level, $logger, $msg)
  };
}

#[macro_export]
macro_rules! warn {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Warn, $level, $logger, $msg)
  };
}

#[macro_export]
macro_rules! error {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Error, $level, $logger, $msg)
  };
}

#[macro_export]
macro_rules! fatal {
  ($level:expr, $logger:expr, $msg:expr) => {
    $crate::log_at!($crate::testkit::LogLevel::Fatal, $level, $logger, $msg)
  };
}

#[cfg(test)]
use std::cell::RefCell;

#[cfg(test)]
struct Sink(RefCell<Vec<String>>);
#[cfg(test)]
impl Sink {
  fn log(&self, msg: LoggerMsg) {
    if let Log(level, s) = msg {
      self.0.borrow_mut().push(format!("{:?} {}", level, s));
    }
  }
}

#[test]
fn test_log_macros_filter_by_level() {
  const LEVEL: LogLevel = LogLevel::Info;
  let sink = Sink(RefCell::new(Vec::new()));
  crate::trace!(LEVEL, &sink, "kelp");
  crate::debug!(LEVEL, &sink, "kelp");
  crate::info!(LEVEL, &sink, "whales");
  crate::warn!(LEVEL, &sink, format!("{} sharks", 3));
  crate::fatal!(LogLevel::Off, &sink, "never");
  assert_eq!(
    *sink.0.borrow(),
    vec!["Info whales".to_string(), "Warn 3 sharks".to_string()]
  );
  assert!(LogLevel::MIN < LogLevel::Off);
}
