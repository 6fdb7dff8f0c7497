use super::{RenderRequest, Renderer};
use crate::error::RenderError;
use crate::template::TemplateModel;
use async_trait::async_trait;
use common::model::options::{OutputFormat, OutputOptions};
use std::sync::Arc;

/// Sends each request to the local renderer that can handle it, or upstream.
///
/// Text output goes to `text`, PDF output from a text template to `pdf`.
/// Binary templates, DOCX output and passwords need `upstream`; without one
/// such combinations are refused at submission through
/// [`Renderer::supports`].
pub struct RoutingRenderer {
    text: Arc<dyn Renderer>,
    pdf: Arc<dyn Renderer>,
    upstream: Option<Arc<dyn Renderer>>,
}

impl RoutingRenderer {
    pub fn new(
        text: Arc<dyn Renderer>,
        pdf: Arc<dyn Renderer>,
        upstream: Option<Arc<dyn Renderer>>,
    ) -> Self {
        Self {
            text,
            pdf,
            upstream,
        }
    }

    /// The renderer for this template and output, or why there is none.
    fn route(&self, template: &TemplateModel, options: &OutputOptions) -> Result<&Arc<dyn Renderer>, String> {
        let needs_upstream = template.media_type().is_binary()
            || options.password.is_some()
            || options.format == OutputFormat::Docx;
        if needs_upstream {
            return self.upstream.as_ref().ok_or_else(|| {
                format!(
                    "{} template to {} output{} needs an upstream renderer, none is configured",
                    template.media_type().extension(),
                    options.format.extension(),
                    if options.password.is_some() {
                        " with a password"
                    } else {
                        ""
                    }
                )
            });
        }
        Ok(match options.format {
            OutputFormat::Txt => &self.text,
            _ => &self.pdf,
        })
    }
}

#[async_trait]
impl Renderer for RoutingRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let renderer = self
            .route(&request.template, &request.options)
            .map_err(RenderError::Template)?;
        renderer.render(request).await
    }

    fn supports(&self, template: &TemplateModel, options: &OutputOptions) -> Result<(), String> {
        self.route(template, options)?.supports(template, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::text::TextRenderer;
    use crate::template::{MediaType, TemplateOptions};

    fn template(media: MediaType, body: &[u8]) -> TemplateModel {
        TemplateModel::parse(body.to_vec(), media, TemplateOptions::default()).unwrap()
    }

    fn local_only() -> RoutingRenderer {
        RoutingRenderer::new(Arc::new(TextRenderer), Arc::new(TextRenderer), None)
    }

    #[test]
    fn docx_and_passwords_need_upstream() {
        let router = local_only();
        let text = template(MediaType::Text, b"[a]");
        let docx = OutputOptions {
            format: OutputFormat::Docx,
            ..Default::default()
        };
        assert!(router.supports(&text, &docx).is_err());
        let locked = OutputOptions {
            format: OutputFormat::Txt,
            password: Some("pw".into()),
            ..Default::default()
        };
        assert!(router.supports(&text, &locked).is_err());
        let plain = OutputOptions {
            format: OutputFormat::Txt,
            ..Default::default()
        };
        assert!(router.supports(&text, &plain).is_ok());
    }

    struct AcceptAll;

    #[async_trait]
    impl Renderer for AcceptAll {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            Ok(b"upstream".to_vec())
        }

        fn supports(&self, _t: &TemplateModel, _o: &OutputOptions) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn binary_templates_route_upstream() {
        let router = RoutingRenderer::new(
            Arc::new(TextRenderer),
            Arc::new(TextRenderer),
            Some(Arc::new(AcceptAll)),
        );
        let pdf = template(MediaType::Pdf, b"%PDF-1.4 [name]");
        let options = OutputOptions::default();
        assert!(router.supports(&pdf, &options).is_ok());
        assert!(local_only().supports(&pdf, &options).is_err());

        let request = RenderRequest::new(
            "b",
            Arc::new(pdf),
            Arc::new(options),
            common::model::record::Record::new(1, Default::default()),
        );
        assert_eq!(router.render(&request).await.unwrap(), b"upstream");
    }
}
