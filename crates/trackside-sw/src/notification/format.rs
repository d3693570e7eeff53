//! Descriptor builders: defaults merging and per-category formatters.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    ActionInput, DataInput, NotificationAction, NotificationData, NotificationDescriptor,
    NotificationInput,
};
use crate::config::NotificationConfig;

pub const DEFAULT_TAG: &str = "default";
pub const DEFAULT_KIND: &str = "default";
pub const REMINDER_PREFIX: &str = "REMINDER: ";

/// Notification categories with their own formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Training,
    Goal,
    Ranking,
    Absence,
}

impl Category {
    /// Parse a `data.type` value.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "training" => Some(Self::Training),
            "goal" => Some(Self::Goal),
            "ranking" => Some(Self::Ranking),
            "absence" => Some(Self::Absence),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Goal => "goal",
            Self::Ranking => "ranking",
            Self::Absence => "absence",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingNotice {
    pub name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoalNotice {
    pub athlete_name: Option<String>,
    pub goal: Option<String>,
    pub achieved: bool,
    /// Percentage, 0-100.
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RankingNotice {
    pub athlete_name: Option<String>,
    pub position: u32,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AbsenceNotice {
    pub athlete_name: Option<String>,
    pub consecutive_absences: u32,
    pub date: Option<String>,
}

/// Typed domain data for one category.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryNotice {
    Training(TrainingNotice),
    Goal(GoalNotice),
    Ranking(RankingNotice),
    Absence(AbsenceNotice),
}

impl CategoryNotice {
    /// Read the category's fields out of a `data` map.
    pub fn parse(
        category: Category,
        fields: &Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        let value = Value::Object(fields.clone());
        Ok(match category {
            Category::Training => Self::Training(serde_json::from_value(value)?),
            Category::Goal => Self::Goal(serde_json::from_value(value)?),
            Category::Ranking => Self::Ranking(serde_json::from_value(value)?),
            Category::Absence => Self::Absence(serde_json::from_value(value)?),
        })
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Training(_) => Category::Training,
            Self::Goal(_) => Category::Goal,
            Self::Ranking(_) => Category::Ranking,
            Self::Absence(_) => Category::Absence,
        }
    }
}

fn athlete(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("An athlete")
}

/// Builds descriptors from configuration defaults.
#[derive(Debug, Clone)]
pub struct NotificationFormatter {
    config: NotificationConfig,
}

impl NotificationFormatter {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    fn base(
        &self,
        title: String,
        body: String,
        tag: &str,
        data: NotificationData,
    ) -> NotificationDescriptor {
        NotificationDescriptor {
            title,
            body,
            icon: self.config.icon.clone(),
            badge: self.config.badge.clone(),
            tag: tag.to_string(),
            data,
            actions: Vec::new(),
            require_interaction: false,
        }
    }

    fn data(url: &str, kind: &str, timestamp: u64, fields: Map<String, Value>) -> NotificationData {
        NotificationData {
            url: url.to_string(),
            kind: kind.to_string(),
            timestamp,
            fields,
        }
    }

    /// Merge loose input with defaults; present fields win.
    pub fn from_input(&self, input: NotificationInput, now: u64) -> NotificationDescriptor {
        let title = input
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.app_name.clone());
        let data = input.data.unwrap_or_default();

        NotificationDescriptor {
            title,
            body: input.body.unwrap_or_else(|| self.config.default_body.clone()),
            icon: input.icon.unwrap_or_else(|| self.config.icon.clone()),
            badge: input.badge.unwrap_or_else(|| self.config.badge.clone()),
            tag: input.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            data: NotificationData {
                url: data.url.unwrap_or_else(|| "/".to_string()),
                kind: data.kind.unwrap_or_else(|| DEFAULT_KIND.to_string()),
                timestamp: data.timestamp.unwrap_or(now),
                fields: data.fields,
            },
            actions: input
                .actions
                .unwrap_or_default()
                .into_iter()
                .filter_map(ActionInput::into_action)
                .collect(),
            require_interaction: input.require_interaction.unwrap_or(false),
        }
    }

    /// A push body that was not JSON: the text becomes the body.
    pub fn from_text(&self, text: &str, now: u64) -> NotificationDescriptor {
        self.from_input(
            NotificationInput {
                body: Some(text.to_string()),
                ..Default::default()
            },
            now,
        )
    }

    /// Last-resort descriptor shown when displaying another one failed.
    pub fn fallback(&self, now: u64) -> NotificationDescriptor {
        self.base(
            self.config.app_name.clone(),
            self.config.fallback_body.clone(),
            DEFAULT_TAG,
            Self::data("/", DEFAULT_KIND, now, Map::new()),
        )
    }

    /// Fixed diagnostic descriptor for `TEST_NOTIFICATION`.
    pub fn diagnostic(&self, message: Option<&str>, now: u64) -> NotificationDescriptor {
        let mut n = self.base(
            "🔔 Test notification".to_string(),
            message.unwrap_or("Notifications are working!").to_string(),
            "test",
            Self::data("/", "test", now, Map::new()),
        );
        n.actions = vec![
            NotificationAction::new("view", "Open app"),
            NotificationAction::new("dismiss", "Dismiss"),
        ];
        n
    }

    /// Follow-up for a notification the user asked to see later.
    pub fn reminder(&self, original: &NotificationDescriptor) -> NotificationDescriptor {
        NotificationDescriptor {
            body: format!("{REMINDER_PREFIX}{}", original.body),
            tag: format!("reminder-{}", original.tag),
            ..original.clone()
        }
    }

    /// Summary shown after a sync tag flushed successfully.
    pub fn sync_complete(
        &self,
        tag: &str,
        label: &str,
        count: u64,
        now: u64,
    ) -> NotificationDescriptor {
        let mut fields = Map::new();
        fields.insert("count".into(), Value::from(count));
        self.base(
            "✅ Sync complete".to_string(),
            format!("{count} {label} synced"),
            tag,
            Self::data("/", "sync", now, fields),
        )
    }

    /// Render a category from a loose `data` block.
    pub fn format_category(
        &self,
        category: Category,
        data: &DataInput,
        now: u64,
    ) -> Result<NotificationDescriptor, serde_json::Error> {
        let notice = CategoryNotice::parse(category, &data.fields)?;
        Ok(self.format(&notice, data.fields.clone(), data.timestamp.unwrap_or(now)))
    }

    /// Render typed category data. `fields` travel along in `data`.
    pub fn format(
        &self,
        notice: &CategoryNotice,
        fields: Map<String, Value>,
        timestamp: u64,
    ) -> NotificationDescriptor {
        let paths = &self.config.paths;
        let category = notice.category();
        let (url, mut n) = match notice {
            CategoryNotice::Training(t) => (&paths.training, self.training(t)),
            CategoryNotice::Goal(g) => (&paths.goals, self.goal(g)),
            CategoryNotice::Ranking(r) => (&paths.ranking, self.ranking(r)),
            CategoryNotice::Absence(a) => (&paths.attendance, self.absence(a)),
        };
        n.tag = category.as_str().to_string();
        n.data = Self::data(url, category.as_str(), timestamp, fields);
        n
    }

    fn empty_data() -> NotificationData {
        Self::data("/", DEFAULT_KIND, 0, Map::new())
    }

    fn training(&self, t: &TrainingNotice) -> NotificationDescriptor {
        let mut body = t.name.clone().unwrap_or_else(|| "Training".to_string());
        if let Some(ref date) = t.date {
            body.push_str(&format!(" on {date}"));
        }
        if let Some(ref time) = t.time {
            body.push_str(&format!(" at {time}"));
        }
        if let Some(ref location) = t.location {
            body.push_str(&format!(" · {location}"));
        }

        let mut n = self.base(
            "🏋️ New training scheduled".into(),
            body,
            "",
            Self::empty_data(),
        );
        n.actions = vec![
            NotificationAction::new("view", "View training"),
            NotificationAction::new("dismiss", "Dismiss"),
        ];
        n
    }

    fn goal(&self, g: &GoalNotice) -> NotificationDescriptor {
        let who = athlete(&g.athlete_name);
        let goal = g.goal.as_deref().unwrap_or("a goal");
        let (title, body) = if g.achieved {
            ("🎯 Goal achieved!", format!("{who} reached the goal: {goal}"))
        } else if let Some(progress) = g.progress {
            ("🎯 Goal progress", format!("{who} is at {progress:.0}% of: {goal}"))
        } else {
            ("🎯 New goal", format!("{who} has a new goal: {goal}"))
        };

        let mut n = self.base(title.into(), body, "", Self::empty_data());
        n.actions = vec![
            NotificationAction::new("view", "View goals"),
            NotificationAction::new("later", "Remind me later"),
            NotificationAction::new("dismiss", "Dismiss"),
        ];
        n
    }

    fn ranking(&self, r: &RankingNotice) -> NotificationDescriptor {
        let title = match r.position {
            1 => "🥇 1st place!",
            2 => "🥈 2nd place!",
            3 => "🥉 3rd place!",
            _ => "🏅 Ranking update",
        };
        let who = athlete(&r.athlete_name);
        let body = match r.category {
            Some(ref category) => format!("{who} is now #{} in the {category} ranking", r.position),
            None => format!("{who} is now #{} in the ranking", r.position),
        };

        let mut n = self.base(title.into(), body, "", Self::empty_data());
        n.actions = vec![
            NotificationAction::new("view", "View ranking"),
            NotificationAction::new("dismiss", "Dismiss"),
        ];
        n
    }

    fn absence(&self, a: &AbsenceNotice) -> NotificationDescriptor {
        let who = athlete(&a.athlete_name);
        let repeated = a.consecutive_absences > 2;
        let (title, body) = if repeated {
            (
                "🚨 Repeated absences",
                format!("{who} has missed {} trainings in a row", a.consecutive_absences),
            )
        } else {
            let when = a
                .date
                .as_deref()
                .map(|d| format!("on {d}"))
                .unwrap_or_else(|| "today".into());
            ("📋 Absence recorded", format!("{who} missed training {when}"))
        };

        let mut n = self.base(title.into(), body, "", Self::empty_data());
        n.require_interaction = repeated;
        n.actions = vec![
            NotificationAction::new("view", "View attendance"),
            NotificationAction::new("dismiss", "Dismiss"),
        ];
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formatter() -> NotificationFormatter {
        NotificationFormatter::new(NotificationConfig::default())
    }

    fn data(value: Value) -> DataInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_input_defaults() {
        let n = formatter().from_input(NotificationInput::default(), 42);
        assert_eq!(n.title, "Trackside");
        assert_eq!(n.body, "You have a new notification");
        assert_eq!(n.tag, "default");
        assert_eq!(n.data.url, "/");
        assert_eq!(n.data.kind, "default");
        assert_eq!(n.data.timestamp, 42);
        assert!(n.actions.is_empty());
        assert!(!n.require_interaction);
    }

    #[test]
    fn test_from_input_keeps_actions_with_an_id() {
        let input = NotificationInput::from_value(&json!({
            "title": "Meta",
            "actions": [
                {"action": "view"},
                {"title": "orphan"},
                {"action": "later", "title": "Later"}
            ]
        }));
        let n = formatter().from_input(input, 0);
        assert_eq!(n.title, "Meta");
        assert_eq!(
            n.actions,
            vec![
                NotificationAction::new("view", "view"),
                NotificationAction::new("later", "Later"),
            ]
        );
    }

    #[test]
    fn test_from_text() {
        let n = formatter().from_text("hello", 1);
        assert_eq!(n.title, "Trackside");
        assert_eq!(n.body, "hello");
    }

    #[test]
    fn test_training_formatter() {
        let f = formatter();
        let n = f
            .format_category(
                Category::Training,
                &data(json!({
                    "type": "training",
                    "name": "Sprint drills",
                    "date": "2024-05-02",
                    "time": "18:00"
                })),
                7,
            )
            .unwrap();
        assert_eq!(n.tag, "training");
        assert_eq!(n.body, "Sprint drills on 2024-05-02 at 18:00");
        assert_eq!(n.data.url, "/treino-do-dia");
        assert_eq!(n.data.kind, "training");
        assert_eq!(n.data.fields["name"], "Sprint drills");
        assert_eq!(n.actions[0].action, "view");
    }

    #[test]
    fn test_goal_formatter_variants() {
        let f = formatter();
        let achieved = f
            .format_category(
                Category::Goal,
                &data(json!({"athleteName": "Ana", "goal": "5k under 20min", "achieved": true})),
                0,
            )
            .unwrap();
        assert_eq!(achieved.title, "🎯 Goal achieved!");
        assert_eq!(achieved.body, "Ana reached the goal: 5k under 20min");
        assert!(achieved.actions.iter().any(|a| a.action == "later"));

        let progress = f
            .format_category(
                Category::Goal,
                &data(json!({"athleteName": "Ana", "goal": "5k", "progress": 62.4})),
                0,
            )
            .unwrap();
        assert_eq!(progress.body, "Ana is at 62% of: 5k");
        assert_eq!(progress.data.url, "/metas");
    }

    #[test]
    fn test_ranking_formatter_by_position() {
        let f = formatter();
        let title = |position: u32| {
            let notice = data(json!({"athleteName": "Rui", "position": position}));
            f.format_category(Category::Ranking, &notice, 0).unwrap().title
        };
        assert_eq!(title(1), "🥇 1st place!");
        assert_eq!(title(2), "🥈 2nd place!");
        assert_eq!(title(3), "🥉 3rd place!");
        assert_eq!(title(7), "🏅 Ranking update");

        let n = f
            .format_category(
                Category::Ranking,
                &data(json!({"athleteName": "Rui", "position": 2, "category": "U17"})),
                0,
            )
            .unwrap();
        assert_eq!(n.body, "Rui is now #2 in the U17 ranking");
        assert_eq!(n.tag, "ranking");
    }

    #[test]
    fn test_absence_escalates_after_two() {
        let f = formatter();
        let mild = f
            .format_category(
                Category::Absence,
                &data(json!({"athleteName": "Leo", "consecutiveAbsences": 2, "date": "12/03"})),
                0,
            )
            .unwrap();
        assert_eq!(mild.title, "📋 Absence recorded");
        assert_eq!(mild.body, "Leo missed training on 12/03");
        assert!(!mild.require_interaction);

        let severe = f
            .format_category(
                Category::Absence,
                &data(json!({"athleteName": "Leo", "consecutiveAbsences": 3})),
                0,
            )
            .unwrap();
        assert_eq!(severe.title, "🚨 Repeated absences");
        assert!(severe.require_interaction);
        assert_eq!(severe.data.url, "/presencas");
    }

    #[test]
    fn test_category_data_with_wrong_types_is_error() {
        let f = formatter();
        let bad = data(json!({"position": "first"}));
        assert!(f.format_category(Category::Ranking, &bad, 0).is_err());
    }

    #[test]
    fn test_reminder() {
        let f = formatter();
        let mut original = f.from_input(NotificationInput::default(), 0);
        original.title = "T".into();
        original.body = "B".into();
        original.tag = "goal".into();

        let reminder = f.reminder(&original);
        assert_eq!(reminder.title, "T");
        assert_eq!(reminder.body, "REMINDER: B");
        assert_eq!(reminder.tag, "reminder-goal");
    }

    #[test]
    fn test_diagnostic_and_sync() {
        let f = formatter();
        let test = f.diagnostic(Some("ping"), 0);
        assert_eq!(test.body, "ping");
        assert_eq!(test.actions.len(), 2);

        let sync = f.sync_complete("sync-presencas", "attendance records", 5, 0);
        assert!(sync.body.contains('5'));
        assert_eq!(sync.tag, "sync-presencas");
    }

    #[test]
    fn test_category_from_type() {
        assert_eq!(Category::from_type("absence"), Some(Category::Absence));
        assert_eq!(Category::from_type("default"), None);
        assert_eq!(Category::Goal.as_str(), "goal");
    }
}
