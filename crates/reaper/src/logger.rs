/*
   Copyright The containerd Authors.

   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

       http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

use std::io::{self, Write};
use std::sync::Mutex;

use log::{Metadata, Record};

use crate::error::Error;

/// Line oriented logger, one `[LEVEL] reaper[label]: message` line per record.
pub struct ReaperLogger {
    prefix: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ReaperLogger {
    pub fn new(label: &str) -> ReaperLogger {
        Self::with_writer(label, Box::new(io::stderr()))
    }

    pub fn with_writer(label: &str, out: Box<dyn Write + Send>) -> ReaperLogger {
        let prefix = if label.is_empty() {
            String::from("reaper")
        } else {
            format!("reaper[{}]", label)
        };

        ReaperLogger {
            prefix,
            out: Mutex::new(out),
        }
    }
}

impl log::Log for ReaperLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // A poisoned lock only means another record was cut short, keep logging.
            let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
            // stderr may be gone when the session that started us is torn down,
            // losing a line is better than losing the reaper.
            let _ = writeln!(
                out,
                "[{}] {}: {}",
                record.level(),
                self.prefix,
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = self.out.lock().unwrap_or_else(|e| e.into_inner()).flush();
    }
}

pub fn init(debug: bool, label: &str) -> Result<(), Error> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    log::set_boxed_logger(Box::new(ReaperLogger::new(label)))?;
    log::set_max_level(level);

    Ok(())
}
