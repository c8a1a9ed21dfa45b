use crate::telegram::api::{ApiResponse, Message, Update};
use crate::telegram::{ChatId, TelegramApi};
use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing as log;

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_url: String,
    bot_token: SecretString,
}

impl TelegramClient {
    pub fn new(bot_token: SecretString, api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            bot_token,
        }
    }

    // The token is part of the URL, so requests are never logged verbatim.
    fn make_request(&self, method: Method, api_method: &str) -> RequestBuilder {
        self.client.request(
            method,
            format!(
                "{}/bot{}/{api_method}",
                self.api_url,
                self.bot_token.expose_secret()
            ),
        )
    }
}

#[async_trait::async_trait]
impl TelegramApi for TelegramClient {
    async fn get_updates(&self, offset: Option<i64>) -> anyhow::Result<Vec<Update>> {
        log::trace!("getUpdates offset={:?}", offset);
        let mut req = self.make_request(Method::GET, "getUpdates");
        if let Some(offset) = offset {
            req = req.query(&[("offset", offset)]);
        }
        let response = req
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("fail fetching Telegram updates")?;
        deserialize_response::<Vec<Update>>(response).await
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> anyhow::Result<Message> {
        #[derive(serde::Serialize)]
        struct SerializedApi<'a> {
            chat_id: ChatId,
            text: &'a str,
        }

        log::trace!("sendMessage chat_id={}", chat_id);
        let response = self
            .make_request(Method::POST, "sendMessage")
            .json(&SerializedApi { chat_id, text })
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("fail sending Telegram message")?;
        deserialize_response::<Message>(response).await
    }
}

async fn deserialize_response<T>(response: Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| e.without_url())
        .context("Telegram API request failed")?;

    match serde_json::from_str::<ApiResponse<T>>(&body) {
        Ok(ApiResponse {
            ok: true,
            result: Some(result),
            ..
        }) => Ok(result),
        Ok(ApiResponse {
            description,
            error_code,
            ..
        }) => Err(anyhow::anyhow!(
            "Telegram API error {}: {}",
            error_code.unwrap_or(i64::from(status.as_u16())),
            description.unwrap_or_else(|| "no description".to_string())
        )),
        Err(e) if !status.is_success() => Err(anyhow::anyhow!(body))
            .with_context(|| format!("Telegram API returned {status}: {e}")),
        Err(e) => Err(e).with_context(|| {
            format!(
                "Failed to deserialize value of type {}",
                std::any::type_name::<T>()
            )
        }),
    }
}
