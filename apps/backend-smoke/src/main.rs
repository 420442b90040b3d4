use std::{env, process, time::Duration};

use chat_backend::HttpChatApi;
use chat_core::{ChatApi, Credential};
use url::Url;

#[tokio::main]
async fn main() {
    let base = env::var("CHAT_API_URL").unwrap_or_else(|_| "http://localhost:8000/".to_owned());
    let base = match Url::parse(&base) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("Invalid CHAT_API_URL '{base}': {err}");
            process::exit(1);
        }
    };

    let api = match HttpChatApi::new(base, Duration::from_secs(15)) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("Failed to build REST client: {err}");
            process::exit(1);
        }
    };

    let (Ok(user_id), Ok(token)) = (env::var("CHAT_USER_ID"), env::var("CHAT_TOKEN")) else {
        println!("REST client ready for {}.", api.base_url());
        println!("Required for live smoke: CHAT_USER_ID and CHAT_TOKEN");
        return;
    };
    let credential = Credential { user_id, token };

    if let Err(err) = api.sync_login(&credential).await {
        eprintln!("Login sync failed: {err}");
        process::exit(1);
    }
    match api.list_chatrooms(&credential).await {
        Ok(chatrooms) => {
            println!("Login sync ok; {} chatroom(s) listed.", chatrooms.len());
            for chatroom in chatrooms {
                println!("  {} {}", chatroom.id, chatroom.display_name(&credential.user_id));
            }
        }
        Err(err) => {
            eprintln!("Chatroom list failed: {err}");
            process::exit(1);
        }
    }
}
