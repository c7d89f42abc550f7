//! Tarot bot
//!
//! Readings, deck browsing and rune draws live in private chats; photos and
//! `/start` / `/help` work everywhere. Inline buttons come back as callbacks.

use relaycore::{Predicate, Route};

use super::RouteDeps;
use crate::handlers::{Forward, Reply};

pub const HELP_TEXT: &str = r"📜 <b>Доступные команды:</b>

<code>/one</code> - самая простая одна карта

🔮 <b>Таро:</b>
<code>/card</code> - Сделать расклад Таро (1 карта по умолчанию).
<code>/card3</code> - Сделать расклад из 3 карт.
<code>/card deck НОМЕР КОЛОДЫ</code> - Выбрать колоду для расклада.
<code>/card flip</code> - Сделать расклад с возможностью перевернутых карт.
<code>/card major</code> - Сделать расклад с использованием только старших арканов.
Команды можно комбинировать: <code>/card3 deck 5 major flip</code>

🌟 <b>Оракул:</b>
<code>/oraculum</code> - Сделать расклад Оракула (1 карта по умолчанию).
<code>/oraculum3</code> - Сделать расклад из 3 карт.
<code>/oraculum flip</code> - Сделать расклад с возможностью перевернутых карт.

🛡️ <b>Футарк:</b>
<code>/futark</code> - Сделать расклад одной руны.
<code>/futark triplet</code> - Сделать расклад из 3 рун.
<code>/futark flip</code> - Сделать расклад с возможностью перевернутых рун.

📚 <b>Колоды:</b>
<code>/decks</code> - Показать список колод Таро.
<code>/decks oraculum</code> - Показать список колод Оракула.

❓ <b>Помощь:</b>
<code>/help</code> - Показать это сообщение.
";

pub fn routes(deps: &RouteDeps) -> Result<Vec<Route>, regex::Error> {
    let forward = |action: &str| Forward::new(deps.backend.clone(), action);
    let private = |pattern: &str| Predicate::command_text(pattern).map(Predicate::in_private);
    let help = Reply::new(deps.responder.clone(), HELP_TEXT);

    Ok(vec![
        Route::new("photo", Predicate::Photo, forward("photo")),
        Route::new("start", Predicate::command("start"), help.clone()),
        Route::new("help", Predicate::command("help"), help),
        Route::new("all_deck", private(r"^/all deck \d+$")?, forward("all_by_deck")),
        Route::new("allcard", Predicate::callback(r"^allcard_")?, forward("allcard")),
        Route::new("futhark", private(r"^/fut(h?)ark( triplet)?$")?, forward("futhark")),
        Route::new("futhark_rune", Predicate::callback(r"^futhark_")?, forward("futhark_rune")),
        Route::new("decks", private(r"^/decks( oraculum)?$")?, forward("decks")),
        Route::new(
            "decks_page",
            Predicate::callback(r"^deckspage_\d+_(oraculum|tarot)$")?,
            forward("decks_page"),
        ),
        Route::new("last", Predicate::command("last").in_private(), forward("last_readings")),
        Route::new("one", Predicate::command("one").in_private(), forward("one")),
        Route::new("card", private(r"^/card(\d+)?")?, forward("card")),
        Route::new("more", Predicate::callback(r"^more_\d+_.+$")?, forward("more")),
        Route::new("desc", Predicate::callback(r"^desc_(\d+(?:#\d+)*)$")?, forward("desc")),
        Route::new(
            "meaning",
            Predicate::callback(r"^meaning_[a-z0-9]+_\d+_[0-9#]+_\d+$")?,
            forward("meaning_page"),
        ),
        Route::new("oraculum", private(r"^/oraculum(\d+)?")?, forward("oraculum")),
        Route::new(
            "more_oracle",
            Predicate::callback(r"^moreoracle_\d+_.+$")?,
            forward("more_oracle"),
        ),
    ])
}
