use anyhow::Result;
use reqwest::Url;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use tracing::{error, info, instrument, warn};

use crate::clubs::ClubDirectory;
use crate::ledger::LedgerUpdater;
use crate::masterlist::Masterlist;
use crate::model::{Action, SubmissionBatch};
use crate::scores::ScoreBoard;
use crate::session::{Access, Pending, Sessions};
use crate::workers::WorkerPool;

const ACCESS_DENIED: &str = "❌ Access denied.";
const USE_MENU: &str = "🔹 Please select 'Submit IDs' from the menu to submit IDs.";
const LOADING: &str = "⏳ Loading... Please wait.";
const CHECKOUT_PROMPT: &str = "🔸 Please send the details in the format: User ID + Expected Return Date and Time + Reason (Input 'Not coming back' for expected return if participant is not coming back).\n\nExample: 0XXXXXXX, 12/8 5:30 PM, Tuition ";
const HELP: &str = "ℹ️ To submit IDs, key in /start and select 'Submit IDs'. For any other assistance, contact the HR team.";

/// Everything the chat handlers need, shared across updates.
pub struct BotState {
    pub ledger: LedgerUpdater,
    pub masterlist: Masterlist,
    pub scores: ScoreBoard,
    pub clubs: ClubDirectory,
    pub sessions: Sessions,
    pub workers: WorkerPool,
}

pub fn login_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🔐 Login", "login",
    )]])
}

pub fn staff_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("📋 Submit IDs", "submit_ids")],
        vec![InlineKeyboardButton::callback("📊 Retrieve Points", "get_points")],
        vec![InlineKeyboardButton::callback(
            "📚 Explore SMUICON Clubs",
            "explore_clubs",
        )],
        vec![InlineKeyboardButton::callback("ℹ️ Help", "help")],
        vec![InlineKeyboardButton::callback("🚪 Exit", "exit")],
    ])
}

pub fn freshman_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "📚 Explore SMUICON Clubs",
            "explore_clubs",
        )],
        vec![InlineKeyboardButton::callback("🚪 Exit", "exit")],
    ])
}

pub fn submit_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "📝 Registration",
            Action::Registration.as_str(),
        )],
        vec![InlineKeyboardButton::callback(
            "⏰ Late Sign In",
            Action::LateSignIn.as_str(),
        )],
        vec![InlineKeyboardButton::callback(
            "🏃‍♂️ Early Check Out",
            Action::EarlyCheckOut.as_str(),
        )],
        vec![InlineKeyboardButton::callback(
            "🔙 Back to Main Menu",
            "main_menu",
        )],
    ])
}

/// One button per club; callback data carries the club's index.
pub fn club_menu(names: &[String]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = names
        .iter()
        .enumerate()
        .map(|(i, name)| vec![InlineKeyboardButton::callback(name.clone(), format!("club:{i}"))])
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 Back to Main Menu",
        "main_menu",
    )]);
    InlineKeyboardMarkup::new(rows)
}

fn ids_prompt(action: Action) -> String {
    match action {
        Action::EarlyCheckOut => CHECKOUT_PROMPT.to_string(),
        _ => format!(
            "🔹 Please send a list of IDs (8 digits long, starting with 0) separated by spaces for {} of multiple IDs.",
            action.label()
        ),
    }
}

fn menu_for(access: Option<&Access>) -> (&'static str, InlineKeyboardMarkup) {
    match access {
        Some(Access::Staff { .. }) => ("🔸 Please choose an option:", staff_menu()),
        Some(Access::Freshman { .. }) => ("🔸 Please choose an option:", freshman_menu()),
        _ => ("🔸 Please log in to continue:", login_menu()),
    }
}

#[instrument(skip_all)]
pub async fn handle_message(bot: &Bot, state: &Arc<BotState>, msg: &Message) -> Result<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let text = text.trim();
    let chat_id = msg.chat.id;

    if text == "/start" {
        let (prompt, menu) = menu_for(None);
        bot.send_message(chat_id, prompt).reply_markup(menu).await?;
        return Ok(());
    }
    if text.starts_with('/') {
        return Ok(());
    }

    let user_id = user.id.0 as i64;
    let Some(session) = state.sessions.get(user_id).await else {
        bot.send_message(chat_id, USE_MENU).await?;
        return Ok(());
    };
    if session.access == Access::Denied {
        bot.send_message(chat_id, ACCESS_DENIED).await?;
        return Ok(());
    }
    let Some(pending) = session.pending else {
        bot.send_message(chat_id, USE_MENU).await?;
        return Ok(());
    };

    let loading = bot.send_message(chat_id, LOADING).await?;

    match pending {
        Pending::Points => {
            let subclan = text.to_uppercase();
            let reply = match state.scores.points(&subclan).await {
                Ok(Some(points)) => format!("🏆 {subclan} has {points} points."),
                Ok(None) => format!(
                    "❌ Subclan '{subclan}' not found. Here's an example you should follow: M3 for Merliosa 3"
                ),
                Err(err) => {
                    warn!(?err, "points lookup failed");
                    "❌ Could not read the score sheet right now. Please try again.".to_string()
                }
            };
            bot.edit_message_text(chat_id, loading.id, reply).await?;
            state.sessions.set_pending(user_id, None).await;
            let (prompt, menu) = menu_for(Some(&session.access));
            bot.send_message(chat_id, prompt).reply_markup(menu).await?;
        }
        Pending::Submit(action) => {
            let batch = match SubmissionBatch::parse(action, text) {
                Ok(batch) => batch,
                Err(err) => {
                    bot.edit_message_text(chat_id, loading.id, err.user_message())
                        .await?;
                    return Ok(());
                }
            };

            let bot = bot.clone();
            let state = state.clone();
            let workers = state.workers.clone();
            workers.spawn(async move {
                let (ok, message) = state.ledger.submit(&batch).await;
                info!(user_id, action = action.as_str(), ok, "submission handled");
                if let Err(err) = bot.edit_message_text(chat_id, loading.id, message).await {
                    error!(?err, "failed to deliver submission report");
                }
                if ok {
                    state
                        .sessions
                        .clear_pending_if(user_id, Pending::Submit(action))
                        .await;
                    if let Err(err) = bot
                        .send_message(chat_id, "🔹 Please choose an action:")
                        .reply_markup(submit_menu())
                        .await
                    {
                        error!(?err, "failed to show submit menu");
                    }
                }
            });
        }
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn handle_callback(bot: &Bot, state: &Arc<BotState>, q: &CallbackQuery) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let (Some(data), Some(chat_id)) = (q.data.as_deref(), q.message.as_ref().map(|m| m.chat.id))
    else {
        return Ok(());
    };

    let user_id = q.from.id.0 as i64;
    let session = state.sessions.get(user_id).await;
    let access = session.as_ref().map(|s| &s.access);
    let logged_in = matches!(access, Some(Access::Staff { .. } | Access::Freshman { .. }));
    let staff = access.is_some_and(Access::is_staff);

    match data {
        "login" => login(bot, state, chat_id, &q.from).await?,
        _ if access == Some(&Access::Denied) => {
            bot.send_message(chat_id, ACCESS_DENIED).await?;
        }
        "submit_ids" if staff => {
            bot.send_message(chat_id, "🔹 Please choose an action:")
                .reply_markup(submit_menu())
                .await?;
        }
        "get_points" if staff => {
            state.sessions.set_pending(user_id, Some(Pending::Points)).await;
            bot.send_message(chat_id, "Which subclan are you from?").await?;
        }
        "explore_clubs" if logged_in => {
            bot.send_message(chat_id, "🔸 Choose Your CCA:")
                .reply_markup(club_menu(state.clubs.names()))
                .await?;
        }
        d if d.starts_with("club:") && logged_in => {
            let club = d["club:".len()..]
                .parse::<usize>()
                .ok()
                .and_then(|i| state.clubs.names().get(i));
            match club {
                Some(club) => show_club(bot, &state.clubs, chat_id, club).await?,
                None => {
                    bot.send_message(chat_id, "❌ Invalid option. Please use the menu to navigate.")
                        .await?;
                }
            }
        }
        d if staff && Action::from_name(d).is_some() => {
            if let Some(action) = Action::from_name(d) {
                state
                    .sessions
                    .set_pending(user_id, Some(Pending::Submit(action)))
                    .await;
                bot.send_message(chat_id, ids_prompt(action)).await?;
            }
        }
        "help" => {
            bot.send_message(chat_id, HELP).await?;
        }
        "exit" => {
            state.sessions.logout(user_id).await;
            bot.send_message(chat_id, "👋 Thank you for using the Attendance Bot. Goodbye!")
                .await?;
            let (prompt, menu) = menu_for(None);
            bot.send_message(chat_id, prompt).reply_markup(menu).await?;
        }
        "main_menu" => {
            let (prompt, menu) = menu_for(access);
            bot.send_message(chat_id, prompt).reply_markup(menu).await?;
        }
        _ => {
            bot.send_message(chat_id, "❌ Invalid option. Please use the menu to navigate.")
                .await?;
        }
    }
    Ok(())
}

async fn login(
    bot: &Bot,
    state: &Arc<BotState>,
    chat_id: ChatId,
    user: &teloxide::types::User,
) -> Result<()> {
    let Some(username) = user.username.as_deref() else {
        bot.send_message(chat_id, "❌ Please set a Telegram username to use this bot.")
            .await?;
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let access = match state.masterlist.member(username).await? {
        Some(member) => Access::from_role(member.name, member.role),
        None => Access::Denied,
    };
    let greeting = match &access {
        Access::Freshman { name } => Some(format!(
            "Welcome, {name}. As a Freshman, you can explore the SMUICON Clubs."
        )),
        Access::Staff { name, role } => Some(format!(
            "Welcome, {name}. Your role is {role}. Please select a corresponding action to continue."
        )),
        Access::Denied => None,
    };
    info!(user_id, username, granted = greeting.is_some(), "login");

    state.sessions.login(user_id, access.clone()).await;
    match greeting {
        Some(greeting) => {
            bot.send_message(chat_id, greeting).await?;
            let (prompt, menu) = menu_for(Some(&access));
            bot.send_message(chat_id, prompt).reply_markup(menu).await?;
        }
        None => {
            bot.send_message(chat_id, ACCESS_DENIED).await?;
        }
    }
    Ok(())
}

async fn show_club(bot: &Bot, clubs: &ClubDirectory, chat_id: ChatId, club: &str) -> Result<()> {
    let loading = bot
        .send_message(chat_id, "Retrieving data, please wait...")
        .await?;
    let url = clubs.url_for(club);
    let info = clubs.fetch(club).await;
    let caption = info.caption(club, &url);

    if let Some(icon) = info.icon_url.as_deref().and_then(|u| Url::parse(u).ok()) {
        match bot
            .send_photo(chat_id, InputFile::url(icon))
            .caption(caption.clone())
            .await
        {
            Ok(_) => {
                if let Err(err) = bot.delete_message(chat_id, loading.id).await {
                    warn!(?err, "failed to delete loading message");
                }
                return Ok(());
            }
            Err(err) => warn!(?err, club, "failed to send club icon; sending text only"),
        }
    }
    bot.edit_message_text(chat_id, loading.id, caption).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callbacks(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn submit_menu_uses_action_names() {
        let data = callbacks(&submit_menu());
        assert_eq!(
            data,
            vec!["registration", "late_sign_in", "early_check_out", "main_menu"]
        );
        for d in &data[..3] {
            assert!(Action::from_name(d).is_some());
        }
    }

    #[test]
    fn club_menu_indexes_clubs() {
        let names = vec!["SMU Roots".to_string(), "SMU Barkada".to_string()];
        assert_eq!(
            callbacks(&club_menu(&names)),
            vec!["club:0", "club:1", "main_menu"]
        );
    }

    #[test]
    fn callback_data_fits_telegram_limit() {
        let names: Vec<String> = (0..100).map(|i| format!("Club {i}")).collect();
        for markup in [login_menu(), staff_menu(), freshman_menu(), submit_menu(), club_menu(&names)] {
            assert!(callbacks(&markup).iter().all(|d| d.len() <= 64));
        }
    }

    #[test]
    fn menus_follow_access() {
        let staff = Access::Staff {
            name: "Bob".into(),
            role: "OGL".into(),
        };
        assert_eq!(callbacks(&menu_for(Some(&staff)).1), callbacks(&staff_menu()));
        let fresh = Access::Freshman { name: "Amy".into() };
        assert_eq!(callbacks(&menu_for(Some(&fresh)).1), vec!["explore_clubs", "exit"]);
        assert_eq!(callbacks(&menu_for(Some(&Access::Denied)).1), vec!["login"]);
    }

    #[test]
    fn prompts_name_the_action() {
        assert!(ids_prompt(Action::LateSignIn).contains("for late sign in of multiple IDs"));
        assert_eq!(ids_prompt(Action::EarlyCheckOut), CHECKOUT_PROMPT);
    }
}
