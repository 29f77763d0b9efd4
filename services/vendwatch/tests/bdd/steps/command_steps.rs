//! BDD step definitions for subscription commands

use cucumber::{then, when};

use vendwatch::commands::{handle_command, Command};
use vendwatch::recipients::{Recipient, RecipientStore};

use crate::world::VendwatchWorld;

#[when(expr = "chat {string} sends {string}")]
async fn chat_sends(world: &mut VendwatchWorld, chat: String, text: String) {
    let command = Command::parse(&text).expect("not a command");
    let reply = handle_command(world.recipients.as_ref(), Recipient::new(chat), command)
        .await
        .unwrap();
    world.reply = Some(reply);
}

#[then(expr = "the reply is {string}")]
fn reply_is(world: &mut VendwatchWorld, expected: String) {
    assert_eq!(world.reply.as_deref(), Some(expected.as_str()));
}

#[then(expr = "there is/are {int} subscriber(s)")]
async fn subscriber_count(world: &mut VendwatchWorld, count: usize) {
    assert_eq!(world.recipients.count().await.unwrap(), count);
}
