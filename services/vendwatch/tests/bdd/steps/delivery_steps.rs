//! BDD step definitions for message delivery and recipient pruning

use cucumber::{given, then};

use vendwatch::recipients::{Recipient, RecipientStore};

use crate::world::{list, VendwatchWorld};

#[given(expr = "subscribed chats {string}")]
async fn subscribed_chats(world: &mut VendwatchWorld, chats: String) {
    for chat in list(&chats) {
        world.recipients.add(Recipient::new(chat)).await.unwrap();
    }
}

#[given(expr = "{string} has blocked the bot")]
async fn blocked_bot(world: &mut VendwatchWorld, chat: String) {
    world.transport.blocked.lock().await.insert(chat);
}

#[given(expr = "delivery to {string} fails transiently {int} time(s)")]
async fn transient_failures(world: &mut VendwatchWorld, chat: String, times: u32) {
    world
        .transport
        .transient_failures
        .lock()
        .await
        .insert(chat, times);
}

#[then("no messages are sent")]
async fn no_messages(world: &mut VendwatchWorld) {
    let delivered = world.transport.delivered.lock().await;
    assert!(delivered.is_empty(), "unexpected messages: {:?}", *delivered);
}

#[then(expr = "{string} receives {string}")]
async fn receives(world: &mut VendwatchWorld, chat: String, texts: String) {
    assert_eq!(world.transport.texts_for(&chat).await, list(&texts));
}

#[then(expr = "{string} receives nothing")]
async fn receives_nothing(world: &mut VendwatchWorld, chat: String) {
    assert!(world.transport.texts_for(&chat).await.is_empty());
}

#[then(expr = "delivery to {string} was attempted {int} time(s)")]
async fn attempted(world: &mut VendwatchWorld, chat: String, times: u32) {
    let attempts = world.transport.attempts.lock().await;
    assert_eq!(attempts.get(&chat).copied().unwrap_or(0), times);
}

#[then(expr = "{string} is no longer subscribed")]
async fn unsubscribed(world: &mut VendwatchWorld, chat: String) {
    let recipients = world.recipients.list().await.unwrap();
    assert!(recipients.iter().all(|r| r.id != chat));
}

#[then(expr = "{string} is still subscribed")]
async fn still_subscribed(world: &mut VendwatchWorld, chat: String) {
    let recipients = world.recipients.list().await.unwrap();
    assert!(recipients.iter().any(|r| r.id == chat));
}
