// ABOUTME: End-to-end runtime tests on a paused clock: feed blocking, exemptions and debounce coalescing.
// ABOUTME: The runtime runs on a LocalSet while the test body plays the role of the site's own scripts.

use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use quietpage_engine::{
    EngineBuilder, Exemption, MatchRule, Page, PageState, PassOutcome, PathMatch, PathPattern,
    Policy, Runtime, Trigger,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinHandle, LocalSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const FEED: &str = r#"<html><head></head><body>
    <nav><a href="/explore/">Explore</a></nav>
    <main role="main"><div id="feed">
        <article>one</article><article>two</article>
    </div></main>
</body></html>"#;

const MARKED: &str = "article[data-quietpage-feed]";

fn feed_policy() -> Policy {
    let mut policy = Policy::new("feed");
    policy.domains = vec!["example.com".into()];
    policy.block_predicates = vec![PathPattern::new("/", PathMatch::Exact)];
    policy.hide_rules = vec![MatchRule::hide("article")];
    policy.message_template = Some("<p>Feed blocked</p>".into());
    policy
}

struct Running {
    outcomes: UnboundedReceiver<PassOutcome>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Running {
    fn start(page: &Rc<Page>, policy: Policy) -> Self {
        let mut runtime: Runtime = EngineBuilder::new().build(Rc::clone(page), policy).unwrap();
        let outcomes = runtime.subscribe();
        let token = runtime.shutdown_token();
        let handle = tokio::task::spawn_local(runtime.run());
        Self {
            outcomes,
            token,
            handle,
        }
    }

    fn drain(&mut self) -> Vec<PassOutcome> {
        let mut out = Vec::new();
        while let Ok(outcome) = self.outcomes.try_recv() {
            out.push(outcome);
        }
        out
    }

    async fn stop(self) {
        self.token.cancel();
        self.handle.await.unwrap();
    }
}

async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

#[tokio::test(start_paused = true)]
async fn feed_is_blocked_until_navigating_to_a_profile() {
    LocalSet::new()
        .run_until(async {
            let page = Rc::new(Page::new("https://example.com/", FEED).unwrap());
            let mut running = Running::start(&page, feed_policy());
            settle().await;

            assert_eq!(page.count(MARKED), 2);
            assert_eq!(page.count("#quietpage-blocked"), 1);

            page.append_html("#feed", "<article>three</article>").unwrap();
            settle().await;
            assert_eq!(page.count(MARKED), 3);
            assert_eq!(page.count("#quietpage-blocked"), 1);

            page.push_state("/someuser/").unwrap();
            page.set_inner_html("main", "<header>someuser</header><article>post</article>")
                .unwrap();
            settle().await;
            assert_eq!(page.count("#quietpage-blocked"), 0);
            assert_eq!(page.count(MARKED), 0);

            sleep(Duration::from_secs(5)).await;
            assert_eq!(page.count("#quietpage-blocked"), 0);
            assert_eq!(page.count(MARKED), 0);

            let states: Vec<PageState> = running.drain().iter().map(|o| o.state).collect();
            assert_eq!(states.first(), Some(&PageState::Blocked));
            assert_eq!(states.last(), Some(&PageState::Allowed));
            running.stop().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_runs_one_pass() {
    LocalSet::new()
        .run_until(async {
            let page = Rc::new(Page::new("https://example.com/", FEED).unwrap());
            let mut running = Running::start(&page, feed_policy());
            settle().await;
            running.drain();

            for i in 0..10 {
                page.append_html("#feed", &format!("<article>burst {}</article>", i))
                    .unwrap();
                sleep(Duration::from_millis(10)).await;
            }
            sleep(Duration::from_millis(200)).await;

            let passes = running.drain();
            assert_eq!(passes.len(), 1);
            assert_eq!(passes[0].coalesced, 10);
            assert_eq!(passes[0].applied, 10);
            assert!(matches!(passes[0].trigger, Trigger::Mutation { .. }));
            assert_eq!(page.count(MARKED), 12);
            running.stop().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn profile_pages_are_never_mutated() {
    LocalSet::new()
        .run_until(async {
            let page = Rc::new(Page::new("https://example.com/alice/", FEED).unwrap());
            let mut running = Running::start(&page, feed_policy());
            settle().await;

            page.append_html("#feed", "<article>new post</article>").unwrap();
            sleep(Duration::from_secs(3)).await;

            assert_eq!(page.count(MARKED), 0);
            assert_eq!(page.count("#quietpage-blocked"), 0);
            assert!(running
                .drain()
                .iter()
                .all(|o| o.state == PageState::Allowed && o.applied == 0));
            running.stop().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn external_deep_link_is_exempt_until_the_path_changes() {
    LocalSet::new()
        .run_until(async {
            let mut policy = feed_policy();
            policy.fallback = PageState::Blocked;
            policy.exemptions = vec![Exemption::ExternalDeepLink {
                internal_hosts: vec!["example.com".into()],
                entry_path: PathPattern::new("/comments/", PathMatch::Contains),
            }];
            let page = Rc::new(
                Page::new("https://example.com/r/rust/comments/abc/title/", FEED)
                    .unwrap()
                    .referred_by("https://www.google.com/search?q=rust")
                    .unwrap(),
            );
            let mut running = Running::start(&page, policy);
            settle().await;

            assert_eq!(page.count("#quietpage-blocked"), 0);
            assert_eq!(page.count(MARKED), 0);
            assert_eq!(running.drain()[0].state, PageState::Exempt);

            page.push_state("/r/rust/comments/def/other/").unwrap();
            settle().await;
            assert_eq!(page.count("#quietpage-blocked"), 1);
            assert_eq!(page.count(MARKED), 2);
            assert_eq!(running.drain().last().map(|o| o.state), Some(PageState::Blocked));
            running.stop().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn host_events_trigger_passes_without_url_change() {
    LocalSet::new()
        .run_until(async {
            let mut policy = feed_policy();
            policy.navigation_event_names = vec!["yt-navigate-finish".into()];
            let page = Rc::new(Page::new("https://example.com/", FEED).unwrap());
            let mut running = Running::start(&page, policy);
            settle().await;
            running.drain();

            page.dispatch_event("yt-navigate-finish");
            settle().await;
            let passes = running.drain();
            assert_eq!(passes.len(), 1);
            assert_eq!(passes[0].trigger, Trigger::HostEvent("yt-navigate-finish".into()));
            assert!(passes[0].skipped);
            running.stop().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn continuous_host_churn_cannot_starve_passes() {
    LocalSet::new()
        .run_until(async {
            let html = FEED.replace("<nav>", "<div id=\"clock\">00:00</div><nav>");
            let page = Rc::new(Page::new("https://example.com/", &html).unwrap());
            let mut running = Running::start(&page, feed_policy());
            settle().await;
            running.drain();

            let tick_clock = |ms: u64| {
                page.set_inner_html("#clock", &format!("<span>{}</span>", ms))
                    .unwrap();
            };

            page.append_html("#feed", "<article>late</article>").unwrap();
            for i in 0..20 {
                tick_clock(i * 50);
                sleep(Duration::from_millis(50)).await;
            }
            assert_eq!(page.count(MARKED), 3, "late article hidden while the clock runs");

            page.push_state("/someuser/").unwrap();
            for i in 20..40 {
                tick_clock(i * 50);
                sleep(Duration::from_millis(50)).await;
            }
            assert_eq!(page.count("#quietpage-blocked"), 0);

            for i in 40..200 {
                tick_clock(i * 50);
                sleep(Duration::from_millis(50)).await;
            }
            let passes = running.drain();
            assert!(passes.len() >= 10, "only {} passes in 10s", passes.len());
            assert!(passes.iter().any(|o| o.trigger == Trigger::SafetyTick));
            assert_eq!(passes.last().map(|o| o.state), Some(PageState::Allowed));
            running.stop().await;
        })
        .await;
}
