// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Interactive collision policy for operators at a terminal.

use std::{
    io::{self, BufRead, Write},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Context};
use diamond_upgrade::{
    collision::{Collision, CollisionPolicy},
    Resolution,
};

/// Number of unrecognized answers accepted before the collision is left unresolved.
pub const DEFAULT_PROMPT_ATTEMPTS: usize = 3;

/// Asks the operator how to settle each collision.
///
/// Answers are read line by line from `input`. After `max_attempts` unrecognized answers, or
/// when the input is closed, the collision stays unresolved and the run fails.
pub struct PromptPolicy {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
    max_attempts: usize,
}

impl PromptPolicy {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
            max_attempts: DEFAULT_PROMPT_ATTEMPTS,
        }
    }

    /// Prompt on stderr and read answers from stdin.
    pub fn terminal() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stderr())
    }

    pub fn with_max_attempts(self, max_attempts: usize) -> Self {
        Self { max_attempts, ..self }
    }
}

fn parse_answer(answer: &str) -> Option<Resolution> {
    match answer.trim().to_lowercase().as_str() {
        "r" | "replace" => Some(Resolution::Replace),
        "s" | "skip" => Some(Resolution::Skip),
        _ => None,
    }
}

impl CollisionPolicy for PromptPolicy {
    fn resolve(&self, collision: &Collision) -> anyhow::Result<Resolution> {
        let mut input = self.input.lock().map_err(|_| anyhow!("prompt input lock poisoned"))?;
        let mut output = self.output.lock().map_err(|_| anyhow!("prompt output lock poisoned"))?;

        writeln!(output, "Collision: {collision}")?;
        for attempt in 1..=self.max_attempts {
            write!(output, "Replace it with {} or skip it? [replace/skip]: ", collision.candidate)?;
            output.flush()?;

            let mut answer = String::new();
            let read = input.read_line(&mut answer).context("failed to read answer")?;
            if read == 0 {
                bail!("input closed before the collision was resolved");
            }
            match parse_answer(&answer) {
                Some(resolution) => {
                    tracing::info!("Operator chose {resolution} for {collision}");
                    return Ok(resolution);
                }
                None => {
                    writeln!(
                        output,
                        "Unrecognized answer {:?} ({attempt}/{})",
                        answer.trim(),
                        self.max_attempts
                    )?;
                }
            }
        }
        bail!("no valid answer after {} attempts", self.max_attempts)
    }
}
