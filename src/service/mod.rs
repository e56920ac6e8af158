pub mod fanout;

use crate::capability::{
    ButtonEventSource, ButtonImageSetter, ButtonLabelSetter, ButtonListener, GridSizeProvider,
    GridSizeSetter, ListenerId,
};
use crate::error::{DeviceError, Result};
use crate::event::Event;
use crate::protocol::{
    ButtonImage, ButtonPosition, DeviceMetadata, Feature, GridSize, PROTOCOL_VERSION,
};
use fanout::{FanoutRegistry, Subscription};
use futures::Stream;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed identity of a device, set once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_type_id: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, device_type_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_type_id: device_type_id.into(),
        }
    }
}

/// Optional capability providers. Absent ones are `None`.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub label: Option<Arc<dyn ButtonLabelSetter>>,
    pub image: Option<Arc<dyn ButtonImageSetter>>,
    pub grid: Option<Arc<dyn GridSizeSetter>>,
    pub custom: Vec<String>,
}

impl Capabilities {
    /// Advertised features, in the fixed order label, display, custom grid,
    /// then custom names in insertion order.
    pub fn features(&self) -> Vec<Feature> {
        let mut features = Vec::with_capacity(3 + self.custom.len());

        if let Some(label) = &self.label {
            features.push(Feature::Label {
                max_length: label.max_length(),
            });
        }
        if let Some(image) = &self.image {
            features.push(Feature::Display {
                preferred_resolution: image.preferred_resolution(),
            });
        }
        if let Some(grid) = &self.grid {
            features.push(Feature::CustomGrid {
                min_size: grid.min_grid_size(),
                max_size: grid.max_grid_size(),
            });
        }
        features.extend(
            self.custom
                .iter()
                .map(|name| Feature::Custom { name: name.clone() }),
        );

        features
    }
}

/// Builder for [`DeviceService`].
pub struct DeviceServiceBuilder {
    identity: DeviceIdentity,
    events: Arc<dyn ButtonEventSource>,
    grid_size: Arc<dyn GridSizeProvider>,
    capabilities: Capabilities,
}

impl DeviceServiceBuilder {
    pub fn label_setter(mut self, setter: Arc<dyn ButtonLabelSetter>) -> Self {
        self.capabilities.label = Some(setter);
        self
    }

    pub fn image_setter(mut self, setter: Arc<dyn ButtonImageSetter>) -> Self {
        self.capabilities.image = Some(setter);
        self
    }

    pub fn grid_size_setter(mut self, setter: Arc<dyn GridSizeSetter>) -> Self {
        self.capabilities.grid = Some(setter);
        self
    }

    /// Advertise a device-specific feature. Repeated names are listed once.
    pub fn custom_feature(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.capabilities.custom.contains(&name) {
            self.capabilities.custom.push(name);
        }
        self
    }

    /// Validate the identity and attach to the event source.
    ///
    /// # Errors
    /// Returns `DeviceError::Config` if the device id or type id is blank.
    pub fn build(self) -> Result<DeviceService> {
        if self.identity.device_id.trim().is_empty() {
            return Err(DeviceError::Config("device id must not be empty".into()));
        }
        if self.identity.device_type_id.trim().is_empty() {
            return Err(DeviceError::Config(
                "device type id must not be empty".into(),
            ));
        }

        let registry = Arc::new(FanoutRegistry::new());
        let listener = Arc::new(FanoutListener {
            registry: Arc::downgrade(&registry),
        });
        let listener_id = self.events.add_listener(listener);

        info!(
            "device service ready: {} ({}), features: {:?}",
            self.identity.device_id,
            self.identity.device_type_id,
            self.capabilities.features()
        );

        Ok(DeviceService {
            identity: self.identity,
            events: self.events,
            listener_id: Mutex::new(Some(listener_id)),
            grid_size: self.grid_size,
            capabilities: self.capabilities,
            registry,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Turns a set of capability providers into the uniform device protocol.
///
/// Every request handler is synchronous and independent. The only state kept
/// across calls is the set of live event subscribers.
pub struct DeviceService {
    identity: DeviceIdentity,
    events: Arc<dyn ButtonEventSource>,
    listener_id: Mutex<Option<ListenerId>>,
    grid_size: Arc<dyn GridSizeProvider>,
    capabilities: Capabilities,
    registry: Arc<FanoutRegistry>,
    shutdown: CancellationToken,
}

impl DeviceService {
    pub fn builder(
        identity: DeviceIdentity,
        events: Arc<dyn ButtonEventSource>,
        grid_size: Arc<dyn GridSizeProvider>,
    ) -> DeviceServiceBuilder {
        DeviceServiceBuilder {
            identity,
            events,
            grid_size,
            capabilities: Capabilities::default(),
        }
    }

    /// Describe the device as it is right now.
    pub fn get_metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            protocol_version: PROTOCOL_VERSION,
            device_id: self.identity.device_id.clone(),
            device_type_id: self.identity.device_type_id.clone(),
            grid_size: self.grid_size.grid_size(),
            features: self.capabilities.features(),
        }
    }

    /// Set a button's label, truncating it to the device's maximum length.
    ///
    /// # Errors
    /// `Unimplemented` without a label provider, `InvalidArgument` if the
    /// position is outside the current grid.
    pub fn set_button_label(&self, button: ButtonPosition, label: &str) -> Result<()> {
        let setter = self.capabilities.label.as_ref().ok_or_else(|| {
            DeviceError::Unimplemented("the label feature is not supported on this device".into())
        })?;
        self.check_button(button)?;

        let label = truncate_chars(label, setter.max_length() as usize);
        debug!("set label {button}: {label:?}");
        setter.set_button_label(button, label);
        Ok(())
    }

    /// Set a button's image. The buffer is passed on unchecked.
    ///
    /// # Errors
    /// `Unimplemented` without an image provider, `InvalidArgument` if the
    /// position is outside the current grid.
    pub fn set_button_image(&self, button: ButtonPosition, image: &ButtonImage) -> Result<()> {
        let setter = self.capabilities.image.as_ref().ok_or_else(|| {
            DeviceError::Unimplemented("the image feature is not supported on this device".into())
        })?;
        self.check_button(button)?;

        debug!(
            "set image {button}: {} {:?}, {} bytes",
            image.size,
            image.format,
            image.pixel_data.len()
        );
        setter.set_button_image(button, image);
        Ok(())
    }

    /// Resize the grid, clamping the request into the device's bounds.
    ///
    /// # Errors
    /// `Unimplemented` without a grid size setter.
    pub fn set_grid_size(&self, requested: GridSize) -> Result<()> {
        let setter = self.capabilities.grid.as_ref().ok_or_else(|| {
            DeviceError::Unimplemented(
                "the custom grid feature is not supported on this device".into(),
            )
        })?;

        let applied = requested.clamp(setter.min_grid_size(), setter.max_grid_size());
        if applied != requested {
            debug!("grid size {requested} clamped to {applied}");
        }
        setter.set_grid_size(applied);
        Ok(())
    }

    /// Open a new event stream.
    ///
    /// The stream sees every event produced after this call, in order, until
    /// it is dropped or the service shuts down.
    ///
    /// # Errors
    /// `Unavailable` after [`shutdown`](Self::shutdown).
    pub fn stream_events(&self) -> Result<EventStream> {
        if self.shutdown.is_cancelled() {
            return Err(DeviceError::Unavailable("device service is shut down".into()));
        }
        let subscription = self.registry.subscribe()?;
        debug!(
            "event stream {:?} opened, {} active",
            subscription.id(),
            self.registry.subscriber_count()
        );
        Ok(EventStream {
            subscription,
            shutdown: self.shutdown.clone(),
        })
    }

    pub fn active_streams(&self) -> usize {
        self.registry.subscriber_count()
    }

    /// End all event streams, refuse new ones and detach from the event source.
    pub fn shutdown(&self) {
        let listener = self
            .listener_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(id) = listener else {
            return;
        };

        info!(
            "device service shutting down, closing {} event streams",
            self.registry.subscriber_count()
        );
        self.shutdown.cancel();
        self.registry.close();
        self.events.remove_listener(id);
    }

    fn check_button(&self, button: ButtonPosition) -> Result<()> {
        let grid = self.grid_size.grid_size();
        if grid.contains(button) {
            Ok(())
        } else {
            Err(DeviceError::InvalidArgument(format!(
                "button position {button} out of grid size {grid}"
            )))
        }
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// First `max` characters of `s`.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Event source listener that publishes into the fan-out registry.
struct FanoutListener {
    registry: Weak<FanoutRegistry>,
}

impl FanoutListener {
    fn publish(&self, event: Event) {
        if let Some(registry) = self.registry.upgrade() {
            let reached = registry.publish(event);
            debug!("{} {} -> {reached} streams", event.kind(), event.button());
        }
    }
}

impl ButtonListener for FanoutListener {
    fn on_button_down(&self, button: ButtonPosition) {
        self.publish(Event::ButtonDown { button });
    }

    fn on_button_up(&self, button: ButtonPosition) {
        self.publish(Event::ButtonUp { button });
    }

    fn on_button_click(&self, button: ButtonPosition) {
        self.publish(Event::ButtonClick { button });
    }
}

/// One client's view of the device's button events.
///
/// Dropping it deregisters the underlying subscription.
pub struct EventStream {
    subscription: Subscription,
    shutdown: CancellationToken,
}

impl EventStream {
    /// Next event, or `None` once the service shuts down.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Event> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            event = self.subscription.recv() => event,
        }
    }

    /// Convert into a [`Stream`] that owns the subscription.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ButtonEventHub;
    use crate::protocol::{PixelFormat, Size};
    use futures::StreamExt;
    use std::time::Duration;

    struct FixedGrid(Mutex<Size>);

    impl GridSizeProvider for FixedGrid {
        fn grid_size(&self) -> GridSize {
            *self.0.lock().unwrap()
        }
    }

    struct Labels {
        max: u32,
        applied: Mutex<Vec<(ButtonPosition, String)>>,
    }

    impl ButtonLabelSetter for Labels {
        fn max_length(&self) -> u32 {
            self.max
        }
        fn set_button_label(&self, button: ButtonPosition, label: &str) {
            self.applied.lock().unwrap().push((button, label.to_string()));
        }
    }

    #[derive(Default)]
    struct Images(Mutex<Vec<(ButtonPosition, ButtonImage)>>);

    impl ButtonImageSetter for Images {
        fn preferred_resolution(&self) -> Size {
            Size::new(72, 72)
        }
        fn set_button_image(&self, button: ButtonPosition, image: &ButtonImage) {
            self.0.lock().unwrap().push((button, image.clone()));
        }
    }

    struct Resizer {
        grid: Arc<FixedGrid>,
        applied: Mutex<Vec<GridSize>>,
    }

    impl GridSizeSetter for Resizer {
        fn min_grid_size(&self) -> GridSize {
            Size::new(1, 1)
        }
        fn max_grid_size(&self) -> GridSize {
            Size::new(8, 4)
        }
        fn set_grid_size(&self, size: GridSize) {
            *self.grid.0.lock().unwrap() = size;
            self.applied.lock().unwrap().push(size);
        }
    }

    struct Fixture {
        hub: Arc<ButtonEventHub>,
        grid: Arc<FixedGrid>,
        labels: Arc<Labels>,
    }

    fn fixture() -> Fixture {
        Fixture {
            hub: Arc::new(ButtonEventHub::new()),
            grid: Arc::new(FixedGrid(Mutex::new(Size::new(4, 3)))),
            labels: Arc::new(Labels {
                max: 20,
                applied: Mutex::new(Vec::new()),
            }),
        }
    }

    fn label_only(fx: &Fixture) -> DeviceService {
        DeviceService::builder(
            DeviceIdentity::new("tmp-id", "virtual/0.1"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .label_setter(fx.labels.clone())
        .build()
        .unwrap()
    }

    fn image(len: usize) -> ButtonImage {
        ButtonImage {
            pixel_data: vec![0; len],
            format: PixelFormat::Rgba32,
            size: Size::new(2, 2),
        }
    }

    #[test]
    fn label_only_device_end_to_end() {
        let fx = fixture();
        let service = label_only(&fx);

        let meta = service.get_metadata();
        assert_eq!(meta.protocol_version, PROTOCOL_VERSION);
        assert_eq!(meta.device_id, "tmp-id");
        assert_eq!(meta.grid_size, Size::new(4, 3));
        assert_eq!(meta.features, vec![Feature::Label { max_length: 20 }]);

        assert!(matches!(
            service.set_button_image(ButtonPosition::new(0, 0), &image(16)),
            Err(DeviceError::Unimplemented(_))
        ));
        assert!(matches!(
            service.set_button_label(ButtonPosition::new(5, 0), "x"),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.set_grid_size(Size::new(2, 2)),
            Err(DeviceError::Unimplemented(_))
        ));

        let long = "abcdefghijklmnopqrstuvwxy";
        assert_eq!(long.len(), 25);
        service
            .set_button_label(ButtonPosition::new(1, 1), long)
            .unwrap();
        assert_eq!(
            *fx.labels.applied.lock().unwrap(),
            vec![(ButtonPosition::new(1, 1), "abcdefghijklmnopqrst".to_string())]
        );
    }

    #[test]
    fn out_of_bounds_has_no_side_effect() {
        let fx = fixture();
        let images = Arc::new(Images::default());
        let service = DeviceService::builder(
            DeviceIdentity::new("id", "type"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .label_setter(fx.labels.clone())
        .image_setter(images.clone())
        .build()
        .unwrap();

        for pos in [
            ButtonPosition::new(4, 0),
            ButtonPosition::new(0, 3),
            ButtonPosition::new(u32::MAX, u32::MAX),
        ] {
            assert!(matches!(
                service.set_button_label(pos, "a"),
                Err(DeviceError::InvalidArgument(_))
            ));
            assert!(matches!(
                service.set_button_image(pos, &image(16)),
                Err(DeviceError::InvalidArgument(_))
            ));
        }
        assert!(fx.labels.applied.lock().unwrap().is_empty());
        assert!(images.0.lock().unwrap().is_empty());

        // Malformed buffers are the provider's problem.
        service
            .set_button_image(ButtonPosition::new(3, 2), &image(3))
            .unwrap();
        assert_eq!(images.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("short", 20), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
        assert_eq!(truncate_chars("anything", 0), "");
    }

    #[test]
    fn grid_size_is_clamped_and_bounds_follow_resize() {
        let fx = fixture();
        let resizer = Arc::new(Resizer {
            grid: fx.grid.clone(),
            applied: Mutex::new(Vec::new()),
        });
        let service = DeviceService::builder(
            DeviceIdentity::new("id", "type"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .label_setter(fx.labels.clone())
        .grid_size_setter(resizer.clone())
        .build()
        .unwrap();

        service.set_grid_size(Size::new(0, 0)).unwrap();
        service.set_grid_size(Size::new(1000, 1000)).unwrap();
        service.set_grid_size(Size::new(5, 2)).unwrap();
        assert_eq!(
            *resizer.applied.lock().unwrap(),
            vec![Size::new(1, 1), Size::new(8, 4), Size::new(5, 2)]
        );

        // (4, 1) was outside the original 4x3 grid, (0, 2) was inside it.
        assert_eq!(service.get_metadata().grid_size, Size::new(5, 2));
        service
            .set_button_label(ButtonPosition::new(4, 1), "ok")
            .unwrap();
        assert!(matches!(
            service.set_button_label(ButtonPosition::new(0, 2), "no"),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn features_follow_supplied_providers() {
        let fx = fixture();
        let service = DeviceService::builder(
            DeviceIdentity::new("id", "type"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .custom_feature("haptics")
        .grid_size_setter(Arc::new(Resizer {
            grid: fx.grid.clone(),
            applied: Mutex::new(Vec::new()),
        }))
        .image_setter(Arc::new(Images::default()))
        .label_setter(fx.labels.clone())
        .custom_feature("haptics")
        .build()
        .unwrap();

        let expected = vec![
            Feature::Label { max_length: 20 },
            Feature::Display {
                preferred_resolution: Size::new(72, 72),
            },
            Feature::CustomGrid {
                min_size: Size::new(1, 1),
                max_size: Size::new(8, 4),
            },
            Feature::Custom {
                name: "haptics".into(),
            },
        ];
        assert_eq!(service.get_metadata().features, expected);
        assert_eq!(service.get_metadata().features, expected);

        let bare = DeviceService::builder(
            DeviceIdentity::new("id", "type"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .build()
        .unwrap();
        assert!(bare.get_metadata().features.is_empty());
    }

    #[test]
    fn blank_identity_is_rejected() {
        let fx = fixture();
        let result = DeviceService::builder(
            DeviceIdentity::new("  ", "type"),
            fx.hub.clone(),
            fx.grid.clone(),
        )
        .build();
        assert!(matches!(result, Err(DeviceError::Config(_))));
        assert_eq!(fx.hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn streams_receive_source_events_in_order() {
        let fx = fixture();
        let service = label_only(&fx);
        let mut a = service.stream_events().unwrap();
        let mut b = service.stream_events().unwrap();

        let pos = ButtonPosition::new(1, 2);
        fx.hub.button_down(pos);
        fx.hub.button_up(pos);
        fx.hub.button_click(pos);

        for stream in [&mut a, &mut b] {
            assert_eq!(stream.next().await, Some(Event::ButtonDown { button: pos }));
            assert_eq!(stream.next().await, Some(Event::ButtonUp { button: pos }));
            assert_eq!(stream.next().await, Some(Event::ButtonClick { button: pos }));
        }

        let mut late = service.stream_events().unwrap();
        fx.hub.button_click(ButtonPosition::new(0, 0));
        assert_eq!(
            late.next().await,
            Some(Event::ButtonClick {
                button: ButtonPosition::new(0, 0)
            })
        );
    }

    #[tokio::test]
    async fn dropped_stream_is_deregistered() {
        let fx = fixture();
        let service = label_only(&fx);

        let stream = service.stream_events().unwrap().into_stream();
        assert_eq!(service.active_streams(), 1);
        drop(stream);
        assert_eq!(service.active_streams(), 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiting_streams() {
        let fx = fixture();
        let service = Arc::new(label_only(&fx));
        let stream = service.stream_events().unwrap();

        let waiter = tokio::spawn(async move { stream.into_stream().collect::<Vec<_>>().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.shutdown();

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(seen.is_empty());
        assert!(matches!(
            service.stream_events(),
            Err(DeviceError::Unavailable(_))
        ));
        assert_eq!(fx.hub.listener_count(), 0);
    }

    #[test]
    fn drop_detaches_from_event_source() {
        let fx = fixture();
        let service = label_only(&fx);
        assert_eq!(fx.hub.listener_count(), 1);
        drop(service);
        assert_eq!(fx.hub.listener_count(), 0);
        fx.hub.button_click(ButtonPosition::new(0, 0));
    }
}
