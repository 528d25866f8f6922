//! crates/expense_tracker_core/src/conversation.rs
//!
//! The conversational state machine behind the chat bot.
//!
//! A user is idle unless the session store holds a `ConversationSession` for
//! them. Free text is classified and either recorded straight away or parked
//! in a session until the user names the right category. While a session
//! exists every message is treated as a correction reply.

use crate::domain::{
    BatchPrediction, ConversationSession, CorrectionRecord, Expense, IncomingMessage, NewExpense,
    Origin, PendingExpense, User,
};
use crate::extraction::{
    capitalize_words, clean_description, extract_amount, is_batch_input, is_cancel_keyword,
    is_done_keyword, parse_correction_line, split_activities, split_corrections, validate_category,
};
use crate::ledger::{ExpenseLedgerService, LedgerError};
use crate::ports::{
    CategoryClassifier, DatabaseService, FeedbackSink, PortError, PortResult, SessionStore,
};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const TRY_AGAIN_LATER: &str =
    "Maaf, sedang ada gangguan. Silakan coba lagi beberapa saat lagi.";

const NOT_REGISTERED: &str = "Akun kamu belum terdaftar. Kirim /start terlebih dahulu.";

const HELP_TEXT: &str = "Kirim pengeluaranmu dalam satu pesan, misalnya:\n\
    • bensin 50000\n\
    • makan siang 25k\n\n\
    Beberapa pengeluaran sekaligus bisa dipisah koma atau baris baru.\n\
    Saat diminta koreksi, balas dengan format \"<nomor>. <kategori>\".\n\
    Ketik /batal untuk membatalkan, /selesai untuk mengakhiri koreksi.";

const SESSION_NOT_SAVED: &str = "⚠️ Pengeluaran yang sudah tercatat di atas tersimpan, \
    tetapi status koreksi gagal diperbarui. Jangan kirim ulang koreksi yang sama; \
    ketik /batal lalu kirim ulang pengeluaran yang belum tercatat.";

const CORRECTION_FORMAT_HINT: &str = "Balas dengan format \"<nomor>. <kategori>\", \
    satu per baris atau dipisah koma (contoh: 1. Makanan, 3. Transportasi).\n\
    Ketik /selesai untuk mengakhiri atau /batal untuk membatalkan.";

/// Formats whole Rupiah with `.` as thousands separator.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-Rp{}", grouped)
    } else {
        format!("Rp{}", grouped)
    }
}

fn is_start_command(text: &str) -> bool {
    let mut words = text.split_whitespace();
    match words.next() {
        Some(first) => first == "/start" || first.starts_with("/start@"),
        None => false,
    }
}

fn is_help_command(text: &str) -> bool {
    matches!(text.split_whitespace().next(), Some("/help"))
}

/// The free-text name stored for an activity; falls back to the raw text when
/// nothing but an amount was typed.
fn expense_name(activity: &str) -> String {
    let cleaned = clean_description(activity);
    if cleaned.is_empty() {
        activity.trim().to_string()
    } else {
        cleaned
    }
}

fn describe_rejection(e: &LedgerError) -> String {
    match e {
        LedgerError::InsufficientFunds => "saldo pemasukan tidak cukup".to_string(),
        LedgerError::InvalidAmount => "nominal tidak ditemukan".to_string(),
        LedgerError::InvalidInput(reason) => format!("data tidak valid ({})", reason),
        LedgerError::Conflict => "data sedang diubah, coba lagi".to_string(),
        LedgerError::NotFound => "pemasukan tidak ditemukan".to_string(),
        LedgerError::Unauthorized => "pemasukan bukan milikmu".to_string(),
        LedgerError::IncomeInUse => "pemasukan sedang dipakai".to_string(),
        LedgerError::Port(_) => "gangguan penyimpanan, coba lagi nanti".to_string(),
    }
}

fn describe_saved(expense: &Expense) -> String {
    format!(
        "{} - {} ({})",
        expense.name,
        format_rupiah(expense.amount),
        expense.category
    )
}

//=========================================================================================
// The Engine
//=========================================================================================

/// Routes each incoming message through the conversation state machine.
///
/// Turns of the same user are serialized so that two quick messages cannot
/// interleave their session reads and writes.
pub struct ConversationEngine {
    db: Arc<dyn DatabaseService>,
    classifier: Arc<dyn CategoryClassifier>,
    sessions: Arc<dyn SessionStore>,
    feedback: Arc<dyn FeedbackSink>,
    ledger: ExpenseLedgerService,
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ConversationEngine {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        classifier: Arc<dyn CategoryClassifier>,
        sessions: Arc<dyn SessionStore>,
        feedback: Arc<dyn FeedbackSink>,
        ledger: ExpenseLedgerService,
    ) -> Self {
        Self {
            db,
            classifier,
            sessions,
            feedback,
            ledger,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one chat turn. Always produces a reply; failures of the
    /// classifier or the store become a generic "try again later".
    pub async fn handle_message(&self, message: IncomingMessage) -> String {
        let user_lock = {
            let mut locks = self.user_locks.lock().await;
            locks.entry(message.telegram_id).or_default().clone()
        };

        let reply = {
            let _turn = user_lock.lock().await;
            match self.dispatch(&message).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Failed to handle message from {}: {}", message.telegram_id, e);
                    TRY_AGAIN_LATER.to_string()
                }
            }
        };

        // Nobody else is queued when only the map and this turn hold the lock.
        let mut locks = self.user_locks.lock().await;
        if Arc::strong_count(&user_lock) == 2 {
            locks.remove(&message.telegram_id);
        }
        reply
    }

    /// Stores the follow-up session once some expenses of this turn are saved.
    /// A store failure becomes a warning in the reply, never an error.
    async fn settle_session(
        &self,
        telegram_id: i64,
        next: Option<ConversationSession>,
        reply: &mut String,
    ) {
        let result = match next {
            Some(session) => self.sessions.set(telegram_id, session).await,
            None => self.sessions.delete(telegram_id).await,
        };
        if let Err(e) = result {
            error!("Failed to update session of {} after recording: {}", telegram_id, e);
            if let Err(e) = self.sessions.delete(telegram_id).await {
                warn!("Stale session of {} could not be dropped: {}", telegram_id, e);
            }
            reply.push_str("\n\n");
            reply.push_str(SESSION_NOT_SAVED);
        }
    }

    async fn dispatch(&self, message: &IncomingMessage) -> PortResult<String> {
        let text = message.text.trim();

        if is_start_command(text) {
            return self.handle_start(message).await;
        }
        if is_help_command(text) {
            return Ok(HELP_TEXT.to_string());
        }

        let user = match self.db.get_user_by_telegram_id(message.telegram_id).await {
            Ok(user) => user,
            Err(PortError::NotFound(_)) => return Ok(NOT_REGISTERED.to_string()),
            Err(e) => return Err(e),
        };

        if let Some(session) = self.sessions.get(message.telegram_id).await? {
            return self.handle_correction(&user, message.telegram_id, session, text).await;
        }

        if is_batch_input(text) {
            self.handle_batch(&user, message.telegram_id, text).await
        } else {
            self.handle_single(&user, message.telegram_id, text).await
        }
    }

    async fn handle_start(&self, message: &IncomingMessage) -> PortResult<String> {
        let user = self
            .db
            .get_or_create_telegram_user(message.telegram_id, message.username.as_deref())
            .await?;
        info!("Telegram user {} linked to {}", message.telegram_id, user.user_id);
        let greeting = match &user.username {
            Some(name) => format!("Halo, {}!", name),
            None => "Halo!".to_string(),
        };
        Ok(format!(
            "{}\nID pengguna kamu: {}\nGunakan ID ini untuk masuk ke dashboard.\n\n{}",
            greeting, user.user_id, HELP_TEXT
        ))
    }

    async fn record(
        &self,
        user: &User,
        name: String,
        amount: i64,
        category: String,
        confidence: Option<f64>,
    ) -> Result<Expense, LedgerError> {
        let data = NewExpense {
            name: Some(name),
            amount: Some(amount),
            category: Some(category),
            date: Some(Utc::now()),
            source_income_id: None,
            origin: Some(Origin::Telegram),
            confidence,
        };
        self.ledger.create_expense(data, user.user_id).await
    }

    async fn append_feedback(&self, telegram_id: i64, activity: &str, predicted: &str, corrected: &str) {
        let record = CorrectionRecord {
            telegram_id,
            activity: activity.to_string(),
            predicted: predicted.to_string(),
            corrected: corrected.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.feedback.append_correction(record).await {
            warn!("Failed to append correction feedback: {}", e);
        }
    }

    //-------------------------------------------------------------------------------------
    // Single expense
    //-------------------------------------------------------------------------------------

    async fn handle_single(&self, user: &User, telegram_id: i64, text: &str) -> PortResult<String> {
        let name = expense_name(text);
        let prediction = self.classifier.predict_category(&name).await?;
        let amount = extract_amount(text);

        if !prediction.is_recognized() {
            info!(
                "Low confidence ({:.2}) for '{}' from {}; asking for a correction",
                prediction.confidence, text, telegram_id
            );
            self.sessions
                .set(
                    telegram_id,
                    ConversationSession::AwaitingSingleCorrection {
                        activity: text.to_string(),
                        prediction: prediction.category.clone(),
                    },
                )
                .await?;
            return Ok(format!(
                "Aku kurang yakin dengan kategori \"{}\".\n\
                 Tebakanku: {} ({:.0}%).\n\
                 Balas dengan kategori yang benar, atau ketik /batal untuk membatalkan.",
                name,
                prediction.category,
                prediction.confidence * 100.0
            ));
        }

        match self
            .record(user, name, amount, prediction.category.clone(), Some(prediction.confidence))
            .await
        {
            Ok(expense) => Ok(format!(
                "✅ Tercatat: {}\nKategori: {} (keyakinan {:.0}%)",
                describe_saved(&expense),
                expense.category,
                prediction.confidence * 100.0
            )),
            Err(LedgerError::Port(e)) => Err(e),
            Err(e) => Ok(format!("❌ Tidak bisa menyimpan: {}.", describe_rejection(&e))),
        }
    }

    //-------------------------------------------------------------------------------------
    // Batch
    //-------------------------------------------------------------------------------------

    async fn handle_batch(&self, user: &User, telegram_id: i64, text: &str) -> PortResult<String> {
        let activities = split_activities(text);
        match activities.as_slice() {
            [] => return Ok(HELP_TEXT.to_string()),
            [single] => return self.handle_single(user, telegram_id, single).await,
            _ => {}
        }

        let names: Vec<String> = activities.iter().map(|a| expense_name(a)).collect();
        let predictions = self.classifier.predict_batch_categories(&names).await?;
        if predictions.len() != activities.len() {
            return Err(PortError::Unexpected(format!(
                "classifier returned {} predictions for {} activities",
                predictions.len(),
                activities.len()
            )));
        }

        let mut saved: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut pending: Vec<PendingExpense> = Vec::new();

        for (position, (activity, BatchPrediction { prediction, .. })) in
            activities.iter().zip(predictions).enumerate()
        {
            let name = names[position].clone();
            let amount = extract_amount(activity);
            if prediction.is_recognized() {
                match self
                    .record(user, name, amount, prediction.category.clone(), Some(prediction.confidence))
                    .await
                {
                    Ok(expense) => saved.push(describe_saved(&expense)),
                    Err(e) => {
                        warn!("Batch item '{}' from {} not recorded: {}", activity, telegram_id, e);
                        failed.push(format!("{} ({})", activity, describe_rejection(&e)));
                    }
                }
            } else {
                pending.push(PendingExpense {
                    index: position + 1,
                    activity: activity.clone(),
                    name,
                    amount,
                    prediction: prediction.category,
                });
            }
        }

        let mut reply = String::new();
        if !saved.is_empty() {
            let _ = writeln!(reply, "✅ Tercatat {} pengeluaran:", saved.len());
            for line in &saved {
                let _ = writeln!(reply, "• {}", line);
            }
        }
        if !failed.is_empty() {
            let _ = writeln!(reply, "❌ Gagal disimpan:");
            for line in &failed {
                let _ = writeln!(reply, "• {}", line);
            }
        }
        if pending.is_empty() {
            return Ok(reply.trim_end().to_string());
        }

        if !reply.is_empty() {
            reply.push('\n');
        }
        let _ = writeln!(reply, "🤔 Aku kurang yakin dengan kategori berikut:");
        for item in &pending {
            let _ = writeln!(reply, "{}. {} (tebakan: {})", item.index, item.activity, item.prediction);
        }
        reply.push('\n');
        reply.push_str(CORRECTION_FORMAT_HINT);

        let session = ConversationSession::AwaitingBatchCorrection { expenses: pending };
        if saved.is_empty() {
            self.sessions.set(telegram_id, session).await?;
        } else {
            self.settle_session(telegram_id, Some(session), &mut reply).await;
        }
        Ok(reply)
    }

    //-------------------------------------------------------------------------------------
    // Corrections
    //-------------------------------------------------------------------------------------

    async fn handle_correction(
        &self,
        user: &User,
        telegram_id: i64,
        session: ConversationSession,
        text: &str,
    ) -> PortResult<String> {
        if is_cancel_keyword(text) {
            self.sessions.delete(telegram_id).await?;
            info!("User {} cancelled their correction", telegram_id);
            return Ok(match session {
                ConversationSession::AwaitingSingleCorrection { activity, .. } => {
                    format!("Dibatalkan. \"{}\" tidak dicatat.", activity)
                }
                ConversationSession::AwaitingBatchCorrection { expenses } => {
                    let mut reply = String::from("Dibatalkan. Pengeluaran berikut tidak dicatat:");
                    for item in &expenses {
                        let _ = write!(reply, "\n{}. {}", item.index, item.activity);
                    }
                    reply
                }
            });
        }

        match session {
            ConversationSession::AwaitingSingleCorrection { activity, prediction } => {
                self.correct_single(user, telegram_id, activity, prediction, text).await
            }
            ConversationSession::AwaitingBatchCorrection { expenses } => {
                self.correct_batch(user, telegram_id, expenses, text).await
            }
        }
    }

    async fn correct_single(
        &self,
        user: &User,
        telegram_id: i64,
        activity: String,
        prediction: String,
        text: &str,
    ) -> PortResult<String> {
        let category = match validate_category(text) {
            Ok(category) => capitalize_words(&category),
            Err(reason) => {
                info!("Rejected category reply from {}: {:?}", telegram_id, reason);
                return Ok(
                    "Kategori tidak valid. Kirim nama kategori yang singkat (maks. 3 kata), \
                     atau ketik /batal untuk membatalkan."
                        .to_string(),
                );
            }
        };

        let result = self
            .record(user, expense_name(&activity), extract_amount(&activity), category.clone(), None)
            .await;
        match result {
            Ok(expense) => {
                let mut reply = format!("✅ Tercatat: {}", describe_saved(&expense));
                self.settle_session(telegram_id, None, &mut reply).await;
                self.append_feedback(telegram_id, &activity, &prediction, &category).await;
                Ok(reply)
            }
            Err(LedgerError::Port(e)) => Err(e),
            Err(e) => {
                self.sessions.delete(telegram_id).await?;
                Ok(format!("❌ Tidak bisa menyimpan \"{}\": {}.", activity, describe_rejection(&e)))
            }
        }
    }

    async fn correct_batch(
        &self,
        user: &User,
        telegram_id: i64,
        mut pending: Vec<PendingExpense>,
        text: &str,
    ) -> PortResult<String> {
        if is_done_keyword(text) {
            self.sessions.delete(telegram_id).await?;
            return Ok("Selesai. Koreksi diakhiri.".to_string());
        }

        let mut saved: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for line in split_corrections(text) {
            let Some((index, raw_category)) = parse_correction_line(&line) else {
                failed.push(format!("\"{}\": format tidak valid", line));
                continue;
            };
            let Some(position) = pending.iter().position(|item| item.index == index) else {
                failed.push(format!("{}: nomor tidak ada dalam daftar", index));
                continue;
            };
            let category = match validate_category(&raw_category) {
                Ok(category) => capitalize_words(&category),
                Err(_) => {
                    failed.push(format!("{}: kategori tidak valid", index));
                    continue;
                }
            };

            let item = &pending[position];
            let name = if item.name.is_empty() {
                expense_name(&item.activity)
            } else {
                item.name.clone()
            };
            let amount = if item.amount > 0 {
                item.amount
            } else {
                extract_amount(&item.activity)
            };

            match self.record(user, name, amount, category.clone(), None).await {
                Ok(expense) => {
                    let item = pending.remove(position);
                    self.append_feedback(telegram_id, &item.activity, &item.prediction, &category)
                        .await;
                    saved.push(format!("{}. {}", index, describe_saved(&expense)));
                }
                Err(e) => {
                    warn!("Correction {} from {} not recorded: {}", index, telegram_id, e);
                    failed.push(format!("{}: gagal disimpan ({})", index, describe_rejection(&e)));
                }
            }
        }

        let mut reply = String::new();
        if !saved.is_empty() {
            let _ = writeln!(reply, "✅ Tercatat:");
            for line in &saved {
                let _ = writeln!(reply, "• {}", line);
            }
        }
        if !failed.is_empty() {
            let _ = writeln!(reply, "❌ Tidak diproses:");
            for line in &failed {
                let _ = writeln!(reply, "• {}", line);
            }
        }

        if !reply.is_empty() {
            reply.push('\n');
        }
        let next = if pending.is_empty() {
            reply.push_str("🎉 Semua pengeluaran sudah dikoreksi.");
            None
        } else {
            let _ = writeln!(reply, "Masih menunggu koreksi:");
            for item in &pending {
                let _ = writeln!(reply, "{}. {} (tebakan: {})", item.index, item.activity, item.prediction);
            }
            reply.push('\n');
            reply.push_str(CORRECTION_FORMAT_HINT);
            Some(ConversationSession::AwaitingBatchCorrection { expenses: pending })
        };

        if saved.is_empty() {
            match next {
                Some(session) => self.sessions.set(telegram_id, session).await?,
                None => self.sessions.delete(telegram_id).await?,
            }
        } else {
            self.settle_session(telegram_id, next, &mut reply).await;
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Income, LedgerEvent, Prediction};
    use crate::memory::{InMemoryDatabase, InMemorySessionStore};
    use crate::ports::NotificationService;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Confident about anything mentioning a known keyword, unsure otherwise.
    struct StubClassifier {
        failing: AtomicBool,
    }

    impl StubClassifier {
        fn predict(activity: &str) -> Prediction {
            let lowered = activity.to_lowercase();
            if lowered.contains("bensin") {
                Prediction::new("Transportasi", 0.92)
            } else if lowered.contains("makan") {
                Prediction::new("Makanan", 0.81)
            } else {
                Prediction::new("Lainnya", 0.31)
            }
        }
    }

    #[async_trait]
    impl CategoryClassifier for StubClassifier {
        async fn predict_category(&self, activity: &str) -> PortResult<Prediction> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PortError::Timeout("classifier".to_string()));
            }
            Ok(Self::predict(activity))
        }

        async fn predict_batch_categories(
            &self,
            activities: &[String],
        ) -> PortResult<Vec<BatchPrediction>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PortError::Timeout("classifier".to_string()));
            }
            Ok(activities
                .iter()
                .map(|a| BatchPrediction {
                    activity: a.clone(),
                    prediction: Self::predict(a),
                })
                .collect())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl NotificationService for NullNotifier {
        async fn publish(&self, _event: LedgerEvent) -> PortResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFeedback {
        records: Mutex<Vec<CorrectionRecord>>,
    }

    #[async_trait]
    impl FeedbackSink for RecordingFeedback {
        async fn append_correction(&self, record: CorrectionRecord) -> PortResult<()> {
            self.records.lock().await.push(record);
            Ok(())
        }
    }

    /// Session store whose writes can be switched off.
    struct FlakySessions {
        inner: Arc<InMemorySessionStore>,
        writes_fail: Arc<AtomicBool>,
    }

    impl FlakySessions {
        fn check_writes(&self) -> PortResult<()> {
            if self.writes_fail.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("session store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionStore for FlakySessions {
        async fn get(&self, telegram_id: i64) -> PortResult<Option<ConversationSession>> {
            self.inner.get(telegram_id).await
        }

        async fn set(&self, telegram_id: i64, session: ConversationSession) -> PortResult<()> {
            self.check_writes()?;
            self.inner.set(telegram_id, session).await
        }

        async fn delete(&self, telegram_id: i64) -> PortResult<()> {
            self.check_writes()?;
            self.inner.delete(telegram_id).await
        }
    }

    const TG: i64 = 4242;

    struct Harness {
        engine: ConversationEngine,
        db: Arc<InMemoryDatabase>,
        sessions: Arc<InMemorySessionStore>,
        classifier: Arc<StubClassifier>,
        feedback: Arc<RecordingFeedback>,
        session_writes_fail: Arc<AtomicBool>,
    }

    impl Harness {
        async fn send(&self, text: &str) -> String {
            self.engine
                .handle_message(IncomingMessage {
                    telegram_id: TG,
                    username: Some("budi".to_string()),
                    text: text.to_string(),
                })
                .await
        }

        async fn user(&self) -> User {
            self.db.get_user_by_telegram_id(TG).await.unwrap()
        }

        async fn expenses(&self) -> Vec<Expense> {
            let user = self.user().await;
            self.db.list_expenses(user.user_id).await.unwrap()
        }

        async fn session(&self) -> Option<ConversationSession> {
            self.sessions.get(TG).await.unwrap()
        }
    }

    /// A registered user with one generous income.
    async fn harness() -> Harness {
        let db = Arc::new(InMemoryDatabase::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let classifier = Arc::new(StubClassifier {
            failing: AtomicBool::new(false),
        });
        let feedback = Arc::new(RecordingFeedback::default());
        let session_writes_fail = Arc::new(AtomicBool::new(false));
        let ledger = ExpenseLedgerService::new(db.clone(), Arc::new(NullNotifier));
        let engine = ConversationEngine::new(
            db.clone(),
            classifier.clone(),
            Arc::new(FlakySessions {
                inner: sessions.clone(),
                writes_fail: session_writes_fail.clone(),
            }),
            feedback.clone(),
            ledger,
        );

        let user = db.get_or_create_telegram_user(TG, Some("budi")).await.unwrap();
        db.insert_income(Income {
            id: Uuid::new_v4(),
            user_id: user.user_id,
            name: "Gaji".to_string(),
            source: "Kantor".to_string(),
            notes: None,
            amount: 10_000_000,
            remaining_amount: 10_000_000,
            date: Utc::now(),
            origin: Origin::Website,
        })
        .await
        .unwrap();

        Harness {
            engine,
            db,
            sessions,
            classifier,
            feedback,
            session_writes_fail,
        }
    }

    #[tokio::test]
    async fn start_registers_and_replies_with_user_id() {
        let h = harness().await;
        let reply = h
            .engine
            .handle_message(IncomingMessage {
                telegram_id: 99,
                username: None,
                text: "/start login".to_string(),
            })
            .await;
        let user = h.db.get_user_by_telegram_id(99).await.unwrap();
        assert!(reply.contains(&user.user_id.to_string()));
    }

    #[tokio::test]
    async fn unregistered_users_are_asked_to_start() {
        let h = harness().await;
        let reply = h
            .engine
            .handle_message(IncomingMessage {
                telegram_id: 7,
                username: None,
                text: "bensin 50000".to_string(),
            })
            .await;
        assert_eq!(reply, NOT_REGISTERED);
    }

    #[tokio::test]
    async fn recognized_single_expense_is_recorded() {
        let h = harness().await;
        let reply = h.send("bensin 50000").await;

        let expenses = h.expenses().await;
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].amount, 50_000);
        assert_eq!(expenses[0].name, "bensin");
        assert_eq!(expenses[0].category, "Transportasi");
        assert_eq!(expenses[0].origin, Origin::Telegram);
        assert!(reply.contains("Rp50.000"));
        assert!(h.session().await.is_none());
    }

    #[tokio::test]
    async fn recognized_expense_without_amount_is_not_recorded() {
        let h = harness().await;
        let reply = h.send("bensin").await;
        assert!(reply.contains("nominal tidak ditemukan"));
        assert!(h.expenses().await.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_single_can_be_cancelled() {
        let h = harness().await;
        h.send("sumbangan 20k").await;
        assert_eq!(
            h.session().await,
            Some(ConversationSession::AwaitingSingleCorrection {
                activity: "sumbangan 20k".to_string(),
                prediction: "Lainnya".to_string(),
            })
        );

        h.send("/batal").await;
        assert!(h.session().await.is_none());
        assert!(h.expenses().await.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_single_is_recorded_after_correction() {
        let h = harness().await;
        h.send("sumbangan 20k").await;

        let reply = h.send("http://spam").await;
        assert!(reply.contains("Kategori tidak valid"));
        assert!(h.session().await.is_some());
        assert!(h.expenses().await.is_empty());

        h.send("amal dan DONASI").await;
        let expenses = h.expenses().await;
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].category, "Amal Dan Donasi");
        assert_eq!(expenses[0].amount, 20_000);
        assert_eq!(expenses[0].confidence, None);
        assert!(h.session().await.is_none());

        let records = h.feedback.records.lock().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].predicted, "Lainnya");
        assert_eq!(records[0].corrected, "Amal Dan Donasi");
    }

    #[tokio::test]
    async fn batch_records_confident_items_and_parks_the_rest() {
        let h = harness().await;
        let reply = h.send("bensin 50k, sumbangan 20k, makan siang 25k, pulsa 100k").await;

        let expenses = h.expenses().await;
        assert_eq!(expenses.len(), 2);

        let Some(ConversationSession::AwaitingBatchCorrection { expenses: pending }) = h.session().await else {
            panic!("expected a batch session");
        };
        let indices: Vec<usize> = pending.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![2, 4]);
        assert_eq!(pending[0].amount, 20_000);
        assert_eq!(pending[1].name, "pulsa");
        assert!(reply.contains("2. sumbangan 20k"));
        assert!(reply.contains("4. pulsa 100k"));
    }

    #[tokio::test]
    async fn batch_correction_resolves_items_one_reply_at_a_time() {
        let h = harness().await;
        h.send("sumbangan 10k\npulsa 20k\nsabun 30k").await;

        h.send("2. Komunikasi").await;
        let Some(ConversationSession::AwaitingBatchCorrection { expenses: pending }) = h.session().await else {
            panic!("expected a batch session");
        };
        let indices: Vec<usize> = pending.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(h.expenses().await.len(), 1);

        let reply = h.send("1. Amal, 3: Kebutuhan Rumah").await;
        assert!(h.session().await.is_none());
        assert!(reply.contains("Semua pengeluaran sudah dikoreksi"));

        let mut amounts: Vec<i64> = h.expenses().await.iter().map(|e| e.amount).collect();
        amounts.sort();
        assert_eq!(amounts, vec![10_000, 20_000, 30_000]);
        assert_eq!(h.feedback.records.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn batch_correction_reports_bad_lines_without_losing_items() {
        let h = harness().await;
        h.send("sumbangan 10k, pulsa 20k").await;

        let reply = h.send("Komunikasi\n9. Amal\n1. 12345\n2. Pulsa").await;
        assert!(reply.contains("format tidak valid"));
        assert!(reply.contains("9: nomor tidak ada"));
        assert!(reply.contains("1: kategori tidak valid"));

        let Some(ConversationSession::AwaitingBatchCorrection { expenses: pending }) = h.session().await else {
            panic!("expected a batch session");
        };
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].index, 1);
        assert_eq!(h.expenses().await.len(), 1);
    }

    #[tokio::test]
    async fn batch_correction_accepts_commas_and_newlines_mixed() {
        let h = harness().await;
        h.send("sumbangan 10k\npulsa 20k\nsabun 30k").await;

        let reply = h.send("1. Amal, 2. Komunikasi\n3. Kebutuhan Rumah").await;
        assert!(!reply.contains("format tidak valid"));
        assert!(h.session().await.is_none());
        assert_eq!(h.expenses().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_session_write_after_recording_reports_what_was_saved() {
        let h = harness().await;
        h.send("sumbangan 10k, pulsa 20k").await;

        h.session_writes_fail.store(true, Ordering::SeqCst);
        let reply = h.send("1. Amal").await;
        assert_ne!(reply, TRY_AGAIN_LATER);
        assert!(reply.contains("Tercatat"));
        assert!(reply.contains(SESSION_NOT_SAVED));
        assert_eq!(h.expenses().await.len(), 1);

        let reply = h.send("/batal").await;
        assert_eq!(reply, TRY_AGAIN_LATER);
        h.session_writes_fail.store(false, Ordering::SeqCst);
        h.send("/batal").await;

        h.session_writes_fail.store(true, Ordering::SeqCst);
        let reply = h.send("bensin 50k, sumbangan 5k").await;
        assert!(reply.contains("Tercatat 1 pengeluaran"));
        assert!(reply.contains(SESSION_NOT_SAVED));
        assert_eq!(h.expenses().await.len(), 2);
    }

    #[tokio::test]
    async fn bare_delimiters_get_the_help_text() {
        let h = harness().await;
        assert_eq!(h.send(",").await, HELP_TEXT);
        assert!(h.session().await.is_none());
        assert!(h.expenses().await.is_empty());
    }

    #[tokio::test]
    async fn user_locks_are_released_after_each_turn() {
        let h = harness().await;
        h.send("bensin 50000").await;
        h.send("sumbangan 10k, pulsa 20k").await;
        assert!(h.engine.user_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn done_discards_pending_items() {
        let h = harness().await;
        h.send("sumbangan 10k, pulsa 20k").await;

        let reply = h.send("SELESAI").await;
        assert!(reply.starts_with("Selesai"));
        assert!(h.session().await.is_none());
        assert!(h.expenses().await.is_empty());
    }

    #[tokio::test]
    async fn session_takes_priority_over_batch_detection() {
        let h = harness().await;
        h.send("sumbangan 10k").await;

        // Looks like a batch, but the user is mid-correction.
        let reply = h.send("bensin 5k, makan 10k").await;
        assert!(reply.contains("Kategori tidak valid"));
        assert!(h.expenses().await.is_empty());
    }

    #[tokio::test]
    async fn single_item_batch_falls_through_to_single() {
        let h = harness().await;
        h.send("bensin 50k,").await;
        assert_eq!(h.expenses().await.len(), 1);
        assert!(h.session().await.is_none());
    }

    #[tokio::test]
    async fn classifier_outage_degrades_to_try_again_later() {
        let h = harness().await;
        h.classifier.failing.store(true, Ordering::SeqCst);

        assert_eq!(h.send("bensin 50000").await, TRY_AGAIN_LATER);
        assert_eq!(h.send("bensin 5k, makan 10k").await, TRY_AGAIN_LATER);
        assert!(h.session().await.is_none());
    }

    #[tokio::test]
    async fn storage_outage_keeps_single_session_for_retry() {
        let h = harness().await;
        h.send("sumbangan 20k").await;
        let user = h.user().await;

        h.db.set_offline(true).await;
        assert_eq!(h.send("Amal").await, TRY_AGAIN_LATER);
        h.db.set_offline(false).await;

        assert!(h.session().await.is_some());
        h.send("Amal").await;
        assert_eq!(h.db.list_expenses(user.user_id).await.unwrap().len(), 1);
    }

    #[test]
    fn formats_rupiah_with_dots() {
        assert_eq!(format_rupiah(0), "Rp0");
        assert_eq!(format_rupiah(950), "Rp950");
        assert_eq!(format_rupiah(1_500_000), "Rp1.500.000");
        assert_eq!(format_rupiah(-25_000), "-Rp25.000");
    }
}
