//! Steps are the units of work submitted as part of an EMR job.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Jar that runs arbitrary commands on the master node.
pub const COMMAND_RUNNER_JAR: &str = "command-runner.jar";

const SPARK_SUBMIT_DEFAULTS: [&str; 5] = [
    "spark-submit",
    "--deploy-mode",
    "cluster",
    "--master",
    "yarn",
];

/// What the cluster does when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOnFailure {
    #[default]
    Continue,
    Terminate,
    CancelAndWait,
}

impl ActionOnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOnFailure::Continue => "CONTINUE",
            ActionOnFailure::Terminate => "TERMINATE",
            ActionOnFailure::CancelAndWait => "CANCEL_AND_WAIT",
        }
    }
}

impl fmt::Display for ActionOnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plain Hadoop jar step, e.g. a MapReduce job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HadoopStep {
    pub name: String,
    pub action_on_failure: ActionOnFailure,
    pub jar_path: String,
    pub args: Vec<String>,
}

impl HadoopStep {
    pub fn new(jar_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: "Hadoop Jar Step".to_string(),
            action_on_failure: ActionOnFailure::default(),
            jar_path: jar_path.into(),
            args,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn action_on_failure(mut self, action: ActionOnFailure) -> Self {
        self.action_on_failure = action;
        self
    }
}

/// A Spark application submitted through `spark-submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparkStep {
    pub name: String,
    pub action_on_failure: ActionOnFailure,
    pub jar_path: String,
    pub entry_class: String,
    /// Maven coordinates passed to `--packages`, kept in insertion order
    /// without duplicates.
    pub packages: Vec<String>,
    pub args: Vec<String>,
}

impl SparkStep {
    pub fn new(
        jar_path: impl Into<String>,
        entry_class: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: "Spark Jar Step".to_string(),
            action_on_failure: ActionOnFailure::default(),
            jar_path: jar_path.into(),
            entry_class: entry_class.into(),
            packages: vec![],
            args,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn action_on_failure(mut self, action: ActionOnFailure) -> Self {
        self.action_on_failure = action;
        self
    }

    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for package in packages {
            let package = package.into();
            if !self.packages.contains(&package) {
                self.packages.push(package);
            }
        }
        self
    }

    fn submit_args(&self) -> Vec<String> {
        let mut args: Vec<String> = SPARK_SUBMIT_DEFAULTS.iter().map(|s| s.to_string()).collect();
        args.push("--class".to_string());
        args.push(self.entry_class.clone());
        if !self.packages.is_empty() {
            args.push("--packages".to_string());
            args.push(self.packages.join(","));
        }
        args.push(self.jar_path.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// An arbitrary `command-runner.jar` invocation, e.g. a Hive or Pig script.
///
/// Unlike the other variants the applications it needs are declared by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub name: String,
    pub action_on_failure: ActionOnFailure,
    pub args: Vec<String>,
    pub applications: BTreeSet<String>,
}

impl CommandStep {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            name: "Command Step".to_string(),
            action_on_failure: ActionOnFailure::default(),
            args,
            applications: BTreeSet::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn action_on_failure(mut self, action: ActionOnFailure) -> Self {
        self.action_on_failure = action;
        self
    }

    pub fn requires<I, S>(mut self, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applications
            .extend(applications.into_iter().map(Into::into));
        self
    }
}

/// One unit of work within a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Hadoop(HadoopStep),
    Spark(SparkStep),
    Command(CommandStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Hadoop(step) => &step.name,
            Step::Spark(step) => &step.name,
            Step::Command(step) => &step.name,
        }
    }

    /// Applications the cluster must have installed to run this step.
    pub fn required_applications(&self) -> BTreeSet<String> {
        match self {
            Step::Hadoop(_) => BTreeSet::new(),
            Step::Spark(_) => BTreeSet::from(["Spark".to_string()]),
            Step::Command(step) => step.applications.clone(),
        }
    }

    /// Render the step in the shape the EMR step API expects.
    pub fn render(&self) -> StepRequest {
        match self {
            Step::Hadoop(step) => StepRequest {
                name: step.name.clone(),
                action_on_failure: step.action_on_failure,
                hadoop_jar_step: JarInvocation {
                    jar: step.jar_path.clone(),
                    args: step.args.clone(),
                },
            },
            Step::Spark(step) => StepRequest {
                name: step.name.clone(),
                action_on_failure: step.action_on_failure,
                hadoop_jar_step: JarInvocation {
                    jar: COMMAND_RUNNER_JAR.to_string(),
                    args: step.submit_args(),
                },
            },
            Step::Command(step) => StepRequest {
                name: step.name.clone(),
                action_on_failure: step.action_on_failure,
                hadoop_jar_step: JarInvocation {
                    jar: COMMAND_RUNNER_JAR.to_string(),
                    args: step.args.clone(),
                },
            },
        }
    }
}

impl From<HadoopStep> for Step {
    fn from(step: HadoopStep) -> Self {
        Step::Hadoop(step)
    }
}

impl From<SparkStep> for Step {
    fn from(step: SparkStep) -> Self {
        Step::Spark(step)
    }
}

impl From<CommandStep> for Step {
    fn from(step: CommandStep) -> Self {
        Step::Command(step)
    }
}

/// A rendered step, as sent to the cluster service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepRequest {
    pub name: String,
    pub action_on_failure: ActionOnFailure,
    pub hadoop_jar_step: JarInvocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JarInvocation {
    pub jar: String,
    pub args: Vec<String>,
}
