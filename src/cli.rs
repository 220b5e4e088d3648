use groupcal::{BusinessResult, Calendar, CalendarManager, CalendarStore};

pub const USAGE: &str = "Usage: groupcal <command>

Commands:
  list <user>                           List the user's calendars
  show <user> <uri>                     Show one calendar
  create <user> <name> [--backend <id>] Create a calendar named <name>
  rename <user> <uri> <name>            Change a calendar's display name
  touch <user> <uri>                    Mark a calendar as modified
  delete <user> <uri>                   Delete a calendar";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List { user: String },
    Show { user: String, uri: String },
    Create { user: String, name: String, backend: Option<String> },
    Rename { user: String, uri: String, name: String },
    Touch { user: String, uri: String },
    Delete { user: String, uri: String },
    Help,
}

pub fn parse_command<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    let mut positional = Vec::new();
    let mut backend = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let id = args
                    .next()
                    .ok_or_else(|| "--backend needs a backend id".to_string())?;
                backend = Some(id);
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {}", flag)),
            _ => positional.push(arg),
        }
    }

    let expect = |count: usize| -> Result<Vec<String>, String> {
        if positional.len() == count {
            Ok(positional.clone())
        } else {
            Err(format!(
                "'{}' takes {} argument(s), got {}",
                command,
                count,
                positional.len()
            ))
        }
    };

    let parsed = match command.as_str() {
        "list" => {
            let [user] = take::<1>(expect(1)?);
            Command::List { user }
        }
        "show" => {
            let [user, uri] = take::<2>(expect(2)?);
            Command::Show { user, uri }
        }
        "create" => {
            let [user, name] = take::<2>(expect(2)?);
            return Ok(Command::Create { user, name, backend });
        }
        "rename" => {
            let [user, uri, name] = take::<3>(expect(3)?);
            Command::Rename { user, uri, name }
        }
        "touch" => {
            let [user, uri] = take::<2>(expect(2)?);
            Command::Touch { user, uri }
        }
        "delete" => {
            let [user, uri] = take::<2>(expect(2)?);
            Command::Delete { user, uri }
        }
        "--help" | "help" => Command::Help,
        other => return Err(format!("Unknown command: {}", other)),
    };

    if backend.is_some() {
        return Err("--backend is only valid with 'create'".to_string());
    }
    Ok(parsed)
}

fn take<const N: usize>(values: Vec<String>) -> [String; N] {
    let mut values = values.into_iter();
    std::array::from_fn(|_| values.next().unwrap_or_default())
}

pub async fn run_command<S: CalendarStore>(
    manager: &CalendarManager<S>,
    command: Command,
) -> BusinessResult<String> {
    match command {
        Command::List { user } => {
            let calendars = manager.find_all(&user, None, None, true)?;
            if calendars.is_empty() {
                return Ok("No calendars.".to_string());
            }
            Ok(calendars
                .iter()
                .map(format_calendar_line)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Show { user, uri } => {
            let calendar = manager.find(&uri, &user)?;
            Ok(format_calendar_details(&calendar))
        }
        Command::Create { user, name, backend } => {
            let candidate = Calendar {
                backend,
                ..Calendar::named(&name)
            };
            let created = manager.create_from_request(candidate, &user).await?;
            Ok(format!("Created {}", format_calendar_line(&created)))
        }
        Command::Rename { user, uri, name } => {
            let patched = manager
                .patch_from_request(Calendar::named(&name), &uri, &user)
                .await?;
            Ok(format!("Renamed {}", format_calendar_line(&patched)))
        }
        Command::Touch { user, uri } => {
            let touched = manager.touch(&uri, &user).await?;
            Ok(format!("Touched {}", format_calendar_line(&touched)))
        }
        Command::Delete { user, uri } => {
            let calendar = manager.find(&uri, &user)?;
            manager.delete(&calendar).await?;
            Ok(format!("Deleted {}", uri))
        }
        Command::Help => Ok(USAGE.to_string()),
    }
}

fn format_calendar_line(calendar: &Calendar) -> String {
    format!(
        "{:<20} {:<24} [{}] ctag {}",
        calendar.public_uri.as_deref().unwrap_or("?"),
        calendar.display_name.as_deref().unwrap_or(""),
        calendar.backend.as_deref().unwrap_or("?"),
        calendar.ctag.unwrap_or(0)
    )
}

fn format_calendar_details(calendar: &Calendar) -> String {
    let mut lines = vec![
        format!("Name:        {}", calendar.display_name.as_deref().unwrap_or("")),
        format!("URI:         {}", calendar.public_uri.as_deref().unwrap_or("")),
        format!("Private URI: {}", calendar.private_uri.as_deref().unwrap_or("")),
        format!("Owner:       {}", calendar.owner_id.as_deref().unwrap_or("")),
        format!("Backend:     {}", calendar.backend.as_deref().unwrap_or("")),
    ];
    if let Some(cruds) = calendar.cruds {
        lines.push(format!("Permissions: {}", cruds));
    }
    if let Some(color) = &calendar.color {
        lines.push(format!("Color:       {}", color));
    }
    lines.push(format!("Sync tag:    {}", calendar.ctag.unwrap_or(0)));
    if let Some(updated) = calendar.last_properties_update {
        lines.push(format!("Modified:    {}", updated.format("%Y-%m-%d %H:%M:%S")));
    }
    lines.join("\n")
}
