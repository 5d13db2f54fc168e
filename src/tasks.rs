//! Task builder: one extraction command per bucket, plus its ordered injection stages.

use crate::catalog::BucketUnit;
use crate::transform::FieldInjection;
use std::fmt;
use std::process::Command;

/// Where the extractor is told to write; the worker captures the process' stdout.
pub const OUTPUT_TARGET: &str = "/dev/stdout";
/// Native structured-text (CSV) output.
pub const FORMAT_FLAG: &str = "-csv";

/// A fully specified extractor invocation. Never goes through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Applied in order to every output line.
    pub stages: Vec<FieldInjection>,
}

impl CommandSpec {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        for s in &self.stages {
            write!(f, " | inject {}", s.field())?;
        }
        Ok(())
    }
}

/// One unit of dispatchable work. Built once, consumed once.
#[derive(Clone, Debug)]
pub struct ExtractionTask {
    pub bucket: BucketUnit,
    pub command: CommandSpec,
}

/// Turns buckets into tasks.
#[derive(Clone, Debug)]
pub struct TaskBuilder {
    argv: Vec<String>,
    static_fields: Vec<FieldInjection>,
    tag_bucket_name: bool,
}

impl TaskBuilder {
    /// `argv` is the extractor prefix, e.g. `["/opt/splunk/bin/splunk", "cmd", "exporttool"]`.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, static_fields: Vec::new(), tag_bucket_name: false }
    }

    pub fn static_fields(mut self, fields: Vec<FieldInjection>) -> Self {
        self.static_fields = fields;
        self
    }

    pub fn tag_bucket_name(mut self, yes: bool) -> Self {
        self.tag_bucket_name = yes;
        self
    }

    /// `<extractor...> <bucket> /dev/stdout -csv`, without any stages.
    pub fn base_command(&self, bucket: &BucketUnit) -> CommandSpec {
        let (program, prefix) = match self.argv.split_first() {
            Some((p, rest)) => (p.clone(), rest.to_vec()),
            None => (String::new(), Vec::new()),
        };
        let mut args = prefix;
        args.push(bucket.path.display().to_string());
        args.push(OUTPUT_TARGET.to_string());
        args.push(FORMAT_FLAG.to_string());
        CommandSpec { program, args, stages: Vec::new() }
    }

    pub fn task_for(&self, bucket: &BucketUnit) -> ExtractionTask {
        let mut command = self.base_command(bucket);
        command.stages.extend(self.static_fields.iter().cloned());
        if self.tag_bucket_name {
            command.stages.push(FieldInjection::new("bucket", bucket.name.clone()));
        }
        ExtractionTask { bucket: bucket.clone(), command }
    }

    pub fn build(&self, buckets: &[BucketUnit]) -> Vec<ExtractionTask> {
        buckets
            .iter()
            .map(|b| {
                let task = self.task_for(b);
                tracing::info!(bucket = %b.path.display(), command = %task.command, "extraction command built");
                task
            })
            .collect()
    }
}
