use log::info;

use crate::channels::ChannelRegistry;
use crate::helix::{ApiError, Helix, HttpClient};
use crate::views::Renderer;

/// Fetch the live snapshot for every monitored channel and apply it.
///
/// On any error the registry is left exactly as it was. Returns the number of
/// live channels after reconciliation.
pub fn refresh<C: HttpClient>(
    helix: &mut Helix<C>,
    registry: &mut ChannelRegistry,
    renderer: &mut dyn Renderer,
) -> Result<usize, ApiError> {
    let snapshot = helix.get_streams(registry.ids())?;
    info!("refresh: {} of {} channels live", snapshot.len(), registry.len());
    registry.reconcile(&snapshot, renderer);
    Ok(registry.live_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, Credentials};
    use crate::testing::FakeHttp;
    use crate::views::testing::RecordingRenderer;

    const CFG: [ChannelConfig; 2] = [
        ChannelConfig { id: "10", name: "ten", picture: &[] },
        ChannelConfig { id: "20", name: "twenty", picture: &[] },
    ];

    fn helix(http: FakeHttp) -> Helix<FakeHttp> {
        Helix::new(http, Credentials { token: "t".into(), client_id: "c".into() })
    }

    #[test]
    fn one_batched_request_for_all_ids() {
        let mut h = helix(FakeHttp::with_streams(r#"{"data":[]}"#));
        let mut reg = ChannelRegistry::new(&CFG, 4);
        refresh(&mut h, &mut reg, &mut RecordingRenderer::default()).unwrap();
        assert_eq!(h.http_mut().gets.len(), 1);
        assert!(h.http_mut().gets[0].ends_with("?user_id=10&user_id=20"));
    }

    #[test]
    fn snapshot_is_applied() {
        let body = r#"{"data":[{"user_id":"20","user_name":"twenty","title":"x","game_name":"y"}]}"#;
        let mut h = helix(FakeHttp::with_streams(body));
        let mut reg = ChannelRegistry::new(&CFG, 4);
        let live = refresh(&mut h, &mut reg, &mut RecordingRenderer::default()).unwrap();
        assert_eq!(live, 1);
        assert_eq!(reg.get("20").unwrap().slot(), Some(0));
    }

    #[test]
    fn malformed_response_keeps_previous_state() {
        let mut reg = ChannelRegistry::new(&CFG, 4);
        let mut r = RecordingRenderer::default();
        reg.set_live_status("10", true, &mut r);

        let mut h = helix(FakeHttp::with_streams(r#"{"data":"nope"}"#));
        assert!(refresh(&mut h, &mut reg, &mut r).is_err());
        assert!(reg.get("10").unwrap().is_live());
        assert!(r.redraws.is_empty());

        let mut h = helix(FakeHttp::with_streams_status(500, ""));
        assert!(matches!(refresh(&mut h, &mut reg, &mut r), Err(ApiError::Status(500))));
        assert_eq!(reg.live_count(), 1);
    }
}
