use std::sync::Arc;

use teloxide::{
    adaptors::DefaultParseMode,
    dispatching::{DpHandlerDescription, HandlerExt, UpdateFilterExt},
    prelude::{DependencyMap, Endpoint},
    requests::Requester,
    types::{InputFile, Message, Update},
    utils::command::BotCommands,
    Bot,
};

use crate::service::{Gateway, Operator, ServiceError};

use super::{Answer, HandlerResult};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Clients:")]
pub enum Command {
    #[command(description = "list clients")]
    Clients,
    #[command(description = "connection statistics")]
    Stats,
    #[command(description = "server status")]
    Status,
    #[command(description = "add a client: /add NAME [DNS1,DNS2]")]
    Add(String),
    #[command(description = "remove a client: /remove NAME")]
    Remove(String),
    #[command(description = "get a client config file: /profile NAME")]
    Profile(String),
    #[command(description = "back up all configs")]
    Backup,
}

/// Splits `/add` arguments into the name and the dns list.
fn add_args(args: &str) -> (String, Vec<String>) {
    let mut parts = args.split_whitespace();
    let name = parts.next().unwrap_or_default().to_owned();
    let dns = parts
        .flat_map(|p| p.split(','))
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect();
    (name, dns)
}

async fn send_answer(bot: &DefaultParseMode<Bot>, msg: &Message, answer: Answer) -> HandlerResult {
    bot.send_message(msg.chat.id, answer.to_msg()).await?;
    Ok(())
}

async fn handler(
    bot: DefaultParseMode<Bot>,
    msg: Message,
    command: Command,
    service: Arc<Gateway>,
    operator: Operator,
) -> HandlerResult {
    match command {
        Command::Clients => {
            send_answer(&bot, &msg, service.list_peers(&operator).await.into()).await?;
        }
        Command::Stats => {
            send_answer(&bot, &msg, service.connection_stats(&operator).await.into()).await?;
        }
        Command::Status => {
            send_answer(&bot, &msg, service.server_status(&operator).await.into()).await?;
        }
        Command::Add(args) => {
            let (name, dns) = add_args(&args);
            if !service.is_installed() {
                send_answer(&bot, &msg, Answer::Error(ServiceError::NotInstalled.to_string()))
                    .await?;
                return Ok(());
            }
            let res = service.add_client(&operator, &name, &dns).await;
            let profile = res.as_ref().ok().and_then(|a| a.profile.clone());
            send_answer(&bot, &msg, res.into()).await?;
            if let Some(path) = profile {
                bot.send_document(msg.chat.id, InputFile::file(path)).await?;
            }
        }
        Command::Remove(name) => {
            let res = service
                .remove_client(&operator, name.trim())
                .await
                .map(|_| format!("Client '{}' removed", name.trim()));
            send_answer(&bot, &msg, Answer::ok(res)).await?;
        }
        Command::Profile(name) => match service.client_profile(&operator, name.trim()).await {
            Ok((path, content)) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{}.conf", name.trim()));
                bot.send_document(
                    msg.chat.id,
                    InputFile::memory(content.into_bytes()).file_name(file_name),
                )
                .await?;
            }
            Err(e) => send_answer(&bot, &msg, Answer::Error(e.to_string())).await?,
        },
        Command::Backup => {
            let res = service.backup_configs(&operator).await;
            let path = res.as_ref().ok().map(|r| r.path.clone());
            send_answer(&bot, &msg, res.into()).await?;
            if let Some(path) = path {
                bot.send_document(msg.chat.id, InputFile::file(path)).await?;
            }
        }
    };

    Ok(())
}

pub fn entry() -> Endpoint<
    'static,
    DependencyMap,
    HandlerResult,
    DpHandlerDescription,
> {
    Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handler)
}
