use anyhow::Result;
use notification_service::Delivery;
use watchlist_core::UserCreatedEvent;

use super::WorkflowContext;
use crate::job::JobOutcome;

/// Profile block substituted into the welcome prompt.
pub fn profile_summary(event: &UserCreatedEvent) -> String {
    format!(
        "- Country: {}\n- Investment Goals: {}\n- Risk Tolerance: {}\n- Preferred Industry: {}",
        event.country, event.investment_goals, event.risk_tolerance, event.preferred_industry
    )
}

pub fn fallback_intro(app_name: &str) -> String {
    format!(
        "Thanks for joining {}. You now have the tools to track markets and make smarter moves.",
        app_name
    )
}

/// Generate a personalised intro and send the welcome email. Generation
/// failures fall back to a canned intro; a send failure fails the run so the
/// queue retries it, replaying the already generated intro.
pub async fn run(
    ctx: &WorkflowContext,
    run_id: &str,
    event: &UserCreatedEvent,
) -> Result<JobOutcome> {
    let intro = ctx
        .steps
        .run(run_id, "generate-welcome-intro", || async move {
            Ok::<_, anyhow::Error>(generate_intro(ctx, event).await)
        })
        .await?;

    let notifier = &ctx.notifier;
    let delivered: bool = ctx
        .steps
        .run(run_id, "send-welcome-email", || async move {
            let delivery = notifier
                .send_welcome_email(&event.email, &event.name, &intro)
                .await?;
            Ok::<_, anyhow::Error>(delivery == Delivery::Sent)
        })
        .await?;

    if !delivered {
        return Ok(JobOutcome::failure(
            "Welcome email not sent: no mail transport configured",
        ));
    }
    Ok(JobOutcome::success("Welcome email sent successfully."))
}

async fn generate_intro(ctx: &WorkflowContext, event: &UserCreatedEvent) -> String {
    let fallback = || fallback_intro(ctx.notifier.app_name());

    let Some(ai) = &ctx.ai else {
        tracing::debug!("No text generator configured, using fallback welcome intro");
        return fallback();
    };

    let prompt = ai_client::prompts::welcome_prompt(&profile_summary(event));
    match ai.generate(&prompt).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            tracing::warn!("Welcome intro for {} came back empty", event.email);
            fallback()
        }
        Err(e) => {
            tracing::warn!("Welcome intro generation failed for {}: {}", event.email, e);
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::tests::{context, without_transport, FixedText, RecordingMailer};
    use std::sync::Arc;

    fn event() -> UserCreatedEvent {
        UserCreatedEvent {
            email: "ada@example.com".into(),
            name: "Ada".into(),
            country: "United Kingdom".into(),
            investment_goals: "Growth".into(),
            risk_tolerance: "Medium".into(),
            preferred_industry: "Technology".into(),
        }
    }

    #[test]
    fn test_profile_summary_lists_every_field() {
        let summary = profile_summary(&event());
        assert!(summary.contains("- Country: United Kingdom"));
        assert!(summary.contains("- Investment Goals: Growth"));
        assert!(summary.contains("- Risk Tolerance: Medium"));
        assert!(summary.contains("- Preferred Industry: Technology"));
    }

    #[tokio::test]
    async fn test_generated_intro_is_sent() {
        let mailer = RecordingMailer::default();
        let sent = mailer.sent.clone();
        let mut ctx = context(mailer).await;
        let ai = Arc::new(FixedText::new(Ok(Some("Welcome, growth investor!"))));
        ctx.ai = Some(ai.clone());

        let outcome = run(&ctx, "welcome:ada@example.com", &event()).await.unwrap();
        assert!(outcome.success);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("Welcome, growth investor!"));
        assert!(ai.prompts.lock().unwrap()[0].contains("- Risk Tolerance: Medium"));
    }

    #[tokio::test]
    async fn test_failed_generation_falls_back() {
        let mailer = RecordingMailer::default();
        let sent = mailer.sent.clone();
        let mut ctx = context(mailer).await;
        ctx.ai = Some(Arc::new(FixedText::new(Err("quota exceeded"))));

        run(&ctx, "welcome:ada@example.com", &event()).await.unwrap();

        let sent = sent.lock().unwrap();
        assert!(sent[0].html.contains(&fallback_intro("TickerWatch")));
    }

    #[tokio::test]
    async fn test_send_failure_fails_run_and_keeps_intro() {
        let mailer = RecordingMailer {
            fail_for: Some("ada@example.com".into()),
            ..Default::default()
        };
        let mut ctx = context(mailer).await;
        let ai = Arc::new(FixedText::new(Ok(Some("Hello"))));
        ctx.ai = Some(ai.clone());

        assert!(run(&ctx, "welcome:ada@example.com", &event()).await.is_err());
        assert!(run(&ctx, "welcome:ada@example.com", &event()).await.is_err());

        // the intro step completed once and is replayed on retry
        assert_eq!(ai.prompts.lock().unwrap().len(), 1);
        assert_eq!(
            ctx.steps
                .completed_steps("welcome:ada@example.com")
                .await
                .unwrap(),
            vec!["generate-welcome-intro"]
        );
    }

    #[tokio::test]
    async fn test_missing_transport_is_reported() {
        let mut ctx = context(RecordingMailer::default()).await;
        ctx.notifier = Arc::new(without_transport());

        let outcome = run(&ctx, "welcome:ada@example.com", &event()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("no mail transport"));
    }
}
