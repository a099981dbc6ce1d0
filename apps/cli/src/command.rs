use fern_application::PageQuery;
use fern_core::{AppError, AppResult};

const USAGE: &str = "usage: fern <migrate | flaky <project_id> [limit] | runs <project_id> [limit] [offset] | stats <project_id>>";
const DEFAULT_FLAKY_LIMIT: usize = 20;
const DEFAULT_RUNS_LIMIT: usize = 50;

/// One operator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Applies pending migrations.
    Migrate,
    /// Prints the flakiest specs of a project.
    Flaky { project_id: String, limit: usize },
    /// Prints one page of a project's runs.
    Runs { project_id: String, page: PageQuery },
    /// Prints run counts and pass rate of a project.
    Stats { project_id: String },
}

impl Command {
    /// Parses the arguments following the program name.
    pub fn parse<I>(args: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            Some("migrate") => Self::Migrate,
            Some("flaky") => Self::Flaky {
                project_id: project_argument(args.next())?,
                limit: numeric_argument("limit", args.next(), DEFAULT_FLAKY_LIMIT)?,
            },
            Some("runs") => {
                let project_id = project_argument(args.next())?;
                let limit = numeric_argument("limit", args.next(), DEFAULT_RUNS_LIMIT)?;
                let offset = numeric_argument("offset", args.next(), 0)?;

                Self::Runs {
                    project_id,
                    page: PageQuery::new(limit, offset)?,
                }
            }
            Some("stats") => Self::Stats {
                project_id: project_argument(args.next())?,
            },
            _ => return Err(AppError::Validation(USAGE.to_owned())),
        };

        if let Some(extra) = args.next() {
            return Err(AppError::Validation(format!(
                "unexpected argument '{extra}'; {USAGE}"
            )));
        }

        Ok(command)
    }
}

fn project_argument(value: Option<String>) -> AppResult<String> {
    value.ok_or_else(|| AppError::Validation(format!("project_id is required; {USAGE}")))
}

fn numeric_argument(name: &str, value: Option<String>, default: usize) -> AppResult<usize> {
    match value {
        Some(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
