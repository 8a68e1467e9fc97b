use std::sync::Arc;

use teloxide::{
    adaptors::DefaultParseMode,
    dispatching::{DpHandlerDescription, HandlerExt, UpdateFilterExt},
    prelude::{DependencyMap, Endpoint},
    requests::Requester,
    types::{Message, Update},
    utils::command::BotCommands,
    Bot,
};

use crate::service::{Gateway, Operator, ServiceError};

use super::{Answer, HandlerResult};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Owner:")]
pub enum Command {
    #[command(description = "install WireGuard on this server")]
    Install,
    #[command(description = "list authorized users")]
    Users,
    #[command(description = "authorize a user: /authorize ID [USERNAME]")]
    Authorize(String),
    #[command(description = "revoke a user: /revoke ID")]
    Revoke(String),
    #[command(
        description = "change a limit: /limit ID FIELD VALUE, fields: max_clients, rate_limit, can_backup, can_view_stats, can_manage_clients"
    )]
    Limit(String),
    #[command(description = "restore default limits: /resetlimits ID")]
    ResetLimits(String),
}

fn parse_id(raw: Option<&str>) -> Result<i64, ServiceError> {
    let raw = raw.ok_or_else(|| ServiceError::Validation("user id is required".to_owned()))?;
    raw.parse()
        .map_err(|_| ServiceError::Validation(format!("invalid user id: {raw}")))
}

fn parse_limit(args: &str) -> Result<(i64, String, i64), ServiceError> {
    let mut parts = args.split_whitespace();
    let id = parse_id(parts.next())?;
    let (Some(field), Some(value)) = (parts.next(), parts.next()) else {
        return Err(ServiceError::Validation(
            "usage: /limit ID FIELD VALUE".to_owned(),
        ));
    };
    let value = value
        .parse()
        .map_err(|_| ServiceError::Validation(format!("invalid value: {value}")))?;
    Ok((id, field.to_owned(), value))
}

async fn handler(
    bot: DefaultParseMode<Bot>,
    msg: Message,
    command: Command,
    service: Arc<Gateway>,
    operator: Operator,
) -> HandlerResult {
    let answer = match command {
        Command::Install => Answer::ok(
            service
                .install(&operator)
                .await
                .map(|_| "WireGuard installed"),
        ),
        Command::Users => service.operators(&operator).await.into(),
        Command::Authorize(args) => {
            let mut parts = args.split_whitespace();
            let res = match parse_id(parts.next()) {
                Ok(id) => {
                    let username = parts.next().map(|u| u.trim_start_matches('@'));
                    service
                        .authorize(&operator, id, username)
                        .await
                        .map(|added| {
                            if added {
                                format!("User {id} authorized")
                            } else {
                                format!("User {id} was already authorized")
                            }
                        })
                }
                Err(e) => Err(e),
            };
            Answer::ok(res)
        }
        Command::Revoke(args) => {
            let res = match parse_id(args.split_whitespace().next()) {
                Ok(id) => service
                    .revoke(&operator, id)
                    .await
                    .map(|removed| {
                        if removed {
                            format!("User {id} revoked")
                        } else {
                            format!("User {id} was not authorized")
                        }
                    }),
                Err(e) => Err(e),
            };
            Answer::ok(res)
        }
        Command::Limit(args) => match parse_limit(&args) {
            Ok((id, field, value)) => {
                match service.update_quota(&operator, id, &field, value).await {
                    Ok(quota) => Answer::Quota(id, quota),
                    Err(e) => Answer::Error(e.to_string()),
                }
            }
            Err(e) => Answer::Error(e.to_string()),
        },
        Command::ResetLimits(args) => {
            let res = match parse_id(args.split_whitespace().next()) {
                Ok(id) => service
                    .reset_quota(&operator, id)
                    .await
                    .map(|_| format!("Limits of {id} reset to defaults")),
                Err(e) => Err(e),
            };
            Answer::ok(res)
        }
    };

    bot.send_message(msg.chat.id, answer.to_msg()).await?;
    Ok(())
}

pub fn entry() -> Endpoint<'static, DependencyMap, HandlerResult, DpHandlerDescription> {
    Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handler)
}
