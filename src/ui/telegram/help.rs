use teloxide::{
    adaptors::DefaultParseMode,
    dispatching::{DpHandlerDescription, HandlerExt, UpdateFilterExt},
    prelude::{DependencyMap, Endpoint},
    requests::Requester,
    types::{Message, Update},
    utils::{command::BotCommands, markdown::escape},
    Bot,
};

use crate::service::Operator;

use super::{admin, clients, HandlerResult};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Help:")]
enum Command {
    #[command(description = "help")]
    Help,
    #[command(description = "start")]
    Start,
}

async fn handler(
    bot: DefaultParseMode<Bot>,
    message: Message,
    command: Command,
    operator: Operator,
) -> HandlerResult {
    match command {
        Command::Help | Command::Start => {
            let mut answer = format!(
                "{help}\n\n{clients}",
                help = Command::descriptions(),
                clients = clients::Command::descriptions(),
            );
            if operator.is_owner {
                answer = format!("{answer}\n\n{}", admin::Command::descriptions());
            }

            bot.send_message(message.chat.id, escape(&answer)).await?;
        }
    };

    Ok(())
}

pub fn entry() -> Endpoint<'static, DependencyMap, HandlerResult, DpHandlerDescription> {
    Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handler)
}
